mod actions;
pub(crate) mod args;

pub(crate) use actions::{
    handle_backup, handle_init, handle_latest_backup, handle_sync, handle_verify_backup,
};
