pub mod cassandra;
pub mod image;
pub mod reaper;

pub mod consts {
    /// Label identifying every object managed by this operator.
    pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
    pub const LABEL_MANAGED_BY_VALUE: &str = "reaper-operator";

    /// Label tying a generated object back to its owning Reaper resource.
    pub const LABEL_REAPER: &str = "cassandra-reaper.io/reaper";
}
