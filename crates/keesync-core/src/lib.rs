#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::missing_errors_doc)]

pub mod backup;
pub mod checksum;
pub mod codec;
pub mod credentials;
pub mod fsutil;
pub mod kdbx;
pub mod merge;
pub mod model;
pub mod rendezvous;
pub mod settings;
pub mod storage;
pub mod sync;

pub use crate::backup::{latest_backup, take_backup, BackupError, Snapshot};
pub use crate::checksum::{equal_content, ChecksumError};
pub use crate::codec::{CodecError, DatabaseCodec, VaultCodec};
pub use crate::kdbx::{AutoCodec, KdbxCodec, KDBX_SIGNATURE};
pub use crate::credentials::{resolve_passphrase, CredentialError};
pub use crate::merge::{
    merge_entries, DatabaseRole, DatabaseSync, MergeError, MergeOutcome, MergeStats,
};
pub use crate::model::*;
pub use crate::rendezvous::{CallbackKind, Rendezvous, RendezvousError};
pub use crate::settings::DatabaseSettings;
pub use crate::storage::{LocalMirrorStorage, RemoteError, RemoteFile, RemoteStorage};
pub use crate::sync::{
    check_latest_backup, BackupReport, ErrorClass, PromoteStep, StageError, SyncError, SyncReport, SyncRound,
    SyncStage, VerifiedBackup,
};

pub use keesync_crypto::{KdfParams, Passphrase};
