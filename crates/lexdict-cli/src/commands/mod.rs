pub mod config_ops;
pub mod dict_ops;
pub mod edit_ops;
pub mod suggest_ops;
