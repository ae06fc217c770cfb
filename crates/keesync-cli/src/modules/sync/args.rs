use clap::{Args, ValueEnum};

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DatabaseFormat {
    /// KeePass KDBX 4
    #[default]
    Kdbx,
    /// keesync's own encrypted format
    Vault,
}

#[derive(Args, Debug, Clone, Default)]
pub struct InitArgs {
    #[arg(long, help = "Name of the root group (defaults to the file name)")]
    pub name: Option<String>,
    #[arg(long, help = "Replace an existing database file")]
    pub force: bool,
    #[arg(long, value_enum, default_value_t = DatabaseFormat::Kdbx)]
    pub format: DatabaseFormat,
    #[arg(long, help = "Argon2 memory cost in KiB (vault format)")]
    pub kdf_memory_kb: Option<u32>,
    #[arg(long, help = "Argon2 iterations (vault format)")]
    pub kdf_iterations: Option<u32>,
}
