mod actions;

pub(crate) use actions::{handle_forget_passphrase, obtain_passphrase, secret_store};
