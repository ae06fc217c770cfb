use std::fs;
use std::path::Path;

use async_trait::async_trait;
use keesync_core::{
    check_latest_backup, equal_content, latest_backup, ErrorClass, FieldValue,
    LocalMirrorStorage, Passphrase, PromoteStep, RemoteError, RemoteFile, RemoteStorage,
    StageError, SyncRound, SyncStage, VaultCodec, PASSWORD_FIELD,
};

mod support;

use support::{at, decode_unlocked, entry, titles, Fixture, PASSPHRASE};

#[tokio::test]
async fn full_round_merges_promotes_and_uploads() {
    let fixture = Fixture::new(
        vec![entry(1, "A local", at(10)), entry(2, "B", at(5))],
        vec![entry(1, "A remote", at(20)), entry(3, "C", at(1))],
    );
    let original_local = fs::read(fixture.local_path()).expect("read local");

    let report = SyncRound::new(&fixture.settings, &VaultCodec, &fixture.remote)
        .run()
        .await
        .expect("round");

    assert_eq!(report.merge.total(), 3);
    assert_eq!(report.merge.remote_wins, 1);
    assert_eq!(fs::read(&report.local_backup).expect("backup"), original_local);
    assert_eq!(report.verified_backup, report.local_backup);

    let local = decode_unlocked(&fixture.local_path(), PASSPHRASE);
    assert_eq!(titles(&local), vec!["A remote", "B", "C"]);
    let password = local
        .entries()
        .iter()
        .find(|entry| entry.title() == Some("B"))
        .and_then(|entry| entry.field(PASSWORD_FIELD))
        .and_then(FieldValue::reveal)
        .map(str::to_owned);
    assert_eq!(password.as_deref(), Some("B password"));

    assert_eq!(
        fs::read(fixture.remote_path()).expect("remote"),
        fs::read(fixture.local_path()).expect("local")
    );
    assert!(!fixture.settings.remote_copy_path().exists());
    assert!(!fixture.settings.sync_file_path().exists());
    assert_eq!(fixture.remote_backups().len(), 1);
}

#[tokio::test]
async fn second_round_is_stable() {
    let fixture = Fixture::new(
        vec![entry(1, "A", at(10))],
        vec![entry(2, "B", at(10))],
    );
    let round = SyncRound::new(&fixture.settings, &VaultCodec, &fixture.remote);
    round.run().await.expect("first round");
    // Keep the second snapshot's mtime distinct on coarse-grained filesystems.
    std::thread::sleep(std::time::Duration::from_millis(1100));
    let report = round.run().await.expect("second round");

    assert_eq!(report.merge.common, 2);
    assert_eq!(report.merge.local_only + report.merge.remote_only, 0);
    let local = decode_unlocked(&fixture.local_path(), PASSPHRASE);
    assert_eq!(titles(&local), vec!["A", "B"]);
}

#[tokio::test]
async fn wrong_passphrase_aborts_before_any_deletion() {
    let mut fixture = Fixture::new(vec![entry(1, "A", at(1))], vec![entry(2, "B", at(1))]);
    fixture.settings.passphrase = Passphrase::new("wrong");
    let before = fs::read(fixture.local_path()).expect("read");

    let err = SyncRound::new(&fixture.settings, &VaultCodec, &fixture.remote)
        .run()
        .await
        .expect_err("must fail");

    assert_eq!(err.stage, SyncStage::Merge);
    assert_eq!(err.class(), ErrorClass::Input);
    assert_eq!(fs::read(fixture.local_path()).expect("read"), before);
    assert!(fixture.settings.remote_copy_path().exists());
}

#[tokio::test]
async fn tampered_backup_blocks_promotion() {
    let fixture = Fixture::new(vec![entry(1, "A", at(1))], vec![entry(2, "B", at(1))]);
    let round = SyncRound::new(&fixture.settings, &VaultCodec, &fixture.remote);
    let before = fs::read(fixture.local_path()).expect("read");

    let backup = round.backup_local().expect("backup");
    round.backup_remote().await.expect("remote backup");
    round.download_remote().await.expect("download");
    round.merge().expect("merge");
    fs::write(&backup, b"silently corrupted").expect("tamper");

    let err = round.verify_backup().expect_err("mismatch");
    assert_eq!(err.stage, SyncStage::VerifyBackup);
    assert_eq!(err.class(), ErrorClass::Integrity);
    assert_eq!(fs::read(fixture.local_path()).expect("read"), before);
    assert!(fixture.settings.sync_file_path().exists());
    assert!(fixture.settings.remote_copy_path().exists());
}

#[tokio::test]
async fn local_edit_after_backup_blocks_promotion() {
    let fixture = Fixture::new(vec![entry(1, "A", at(1))], vec![]);
    let round = SyncRound::new(&fixture.settings, &VaultCodec, &fixture.remote);
    round.backup_local().expect("backup");
    fs::write(
        fixture.local_path(),
        support::encode(vec![entry(9, "late edit", at(2))], PASSPHRASE),
    )
    .expect("edit");

    let err = round.verify_backup().expect_err("mismatch");
    assert_eq!(err.class(), ErrorClass::Integrity);
}

/// Runs every stage up to promotion and hands back the verified token.
async fn ready_to_promote(round: &SyncRound<'_>) -> keesync_core::VerifiedBackup {
    round.backup_local().expect("backup");
    round.backup_remote().await.expect("remote backup");
    round.download_remote().await.expect("download");
    round.merge().expect("merge");
    round.verify_backup().expect("verify")
}

#[tokio::test]
async fn missing_remote_copy_stops_promotion_before_the_original_is_touched() {
    let fixture = Fixture::new(vec![entry(1, "A", at(1))], vec![entry(2, "B", at(1))]);
    let round = SyncRound::new(&fixture.settings, &VaultCodec, &fixture.remote);
    let before = fs::read(fixture.local_path()).expect("read");
    let verified = ready_to_promote(&round).await;
    fs::remove_file(fixture.settings.remote_copy_path()).expect("remove remote copy");

    let err = round.promote(verified).expect_err("promotion fails");

    assert_eq!(err.stage, SyncStage::Promote);
    assert_eq!(err.promote_step(), Some(PromoteStep::RemoveRemoteCopy));
    assert!(!err.local_missing());
    assert_eq!(fs::read(fixture.local_path()).expect("read"), before);
    assert!(fixture.settings.sync_file_path().exists());
}

#[tokio::test]
async fn failed_rename_reports_where_the_merged_database_is() {
    let fixture = Fixture::new(vec![entry(1, "A", at(1))], vec![entry(2, "B", at(1))]);
    let round = SyncRound::new(&fixture.settings, &VaultCodec, &fixture.remote);
    let verified = ready_to_promote(&round).await;
    let snapshot = verified.snapshot().path.clone();
    fs::remove_file(fixture.settings.sync_file_path()).expect("remove sync output");

    let err = round.promote(verified).expect_err("promotion fails");

    assert_eq!(err.stage, SyncStage::Promote);
    assert_eq!(err.class(), ErrorClass::Recovery);
    assert!(err.local_missing());
    assert_eq!(err.promote_step(), Some(PromoteStep::RenameSyncOutput));
    let message = err.source.to_string();
    assert!(message.contains(&fixture.settings.sync_file_path().display().to_string()));
    assert!(message.contains(&snapshot.display().to_string()));
    assert!(!fixture.local_path().exists());
    assert!(snapshot.exists());
}

#[tokio::test]
async fn promoted_file_is_not_yet_covered_by_a_snapshot() {
    let fixture = Fixture::new(vec![entry(1, "A", at(1))], vec![entry(2, "B", at(1))]);
    SyncRound::new(&fixture.settings, &VaultCodec, &fixture.remote)
        .run()
        .await
        .expect("round");

    let err = check_latest_backup(&fixture.settings.backup_directory, &fixture.local_path())
        .expect_err("fresh encoding differs from the pre-sync snapshot");
    assert!(matches!(err, StageError::BackupMismatch { .. }));
}

#[tokio::test]
async fn backup_is_a_true_copy_until_the_original_changes() {
    let fixture = Fixture::new(vec![entry(1, "A", at(1))], vec![]);
    let round = SyncRound::new(&fixture.settings, &VaultCodec, &fixture.remote);
    let backup = round.backup_local().expect("backup");

    assert!(equal_content(&fixture.local_path(), &backup).expect("compare"));
    let latest = latest_backup(&fixture.settings.backup_directory).expect("latest");
    assert_eq!(latest.path, backup);
}

#[tokio::test]
async fn missing_remote_file_fails_remote_backup() {
    let fixture = Fixture::new(vec![entry(1, "A", at(1))], vec![]);
    fs::remove_file(fixture.remote_path()).expect("remove remote");

    let err = SyncRound::new(&fixture.settings, &VaultCodec, &fixture.remote)
        .run()
        .await
        .expect_err("must fail");
    assert_eq!(err.stage, SyncStage::BackupRemote);
    assert_eq!(err.class(), ErrorClass::Remote);
    assert!(!err.needs_upload_retry());
}

#[tokio::test]
async fn missing_local_file_fails_first_stage() {
    let fixture = Fixture::new(vec![], vec![]);
    fs::remove_file(fixture.local_path()).expect("remove local");

    let err = SyncRound::new(&fixture.settings, &VaultCodec, &fixture.remote)
        .run()
        .await
        .expect_err("must fail");
    assert_eq!(err.stage, SyncStage::BackupLocal);
    assert_eq!(err.class(), ErrorClass::Io);
}

struct UploadRefused {
    inner: LocalMirrorStorage,
}

#[async_trait]
impl RemoteStorage for UploadRefused {
    async fn find_by_name(&self, name: &str) -> Result<RemoteFile, RemoteError> {
        self.inner.find_by_name(name).await
    }

    async fn download_to(&self, file: &RemoteFile, local_path: &Path) -> Result<(), RemoteError> {
        self.inner.download_to(file, local_path).await
    }

    async fn upload_replacing(
        &self,
        _file: &RemoteFile,
        _local_path: &Path,
    ) -> Result<(), RemoteError> {
        Err(RemoteError::Status {
            action: "upload file",
            status: 503,
            body: "backend unavailable".to_owned(),
        })
    }

    async fn copy_as(
        &self,
        file: &RemoteFile,
        new_name: &str,
        parent: &RemoteFile,
    ) -> Result<RemoteFile, RemoteError> {
        self.inner.copy_as(file, new_name, parent).await
    }
}

#[tokio::test]
async fn failed_upload_leaves_local_promoted_and_asks_for_retry() {
    let fixture = Fixture::new(vec![entry(1, "A", at(1))], vec![entry(2, "B", at(1))]);
    let remote = UploadRefused {
        inner: fixture.remote.clone(),
    };
    let remote_before = fs::read(fixture.remote_path()).expect("read");

    let err = SyncRound::new(&fixture.settings, &VaultCodec, &remote)
        .run()
        .await
        .expect_err("upload fails");

    assert_eq!(err.stage, SyncStage::UploadRemote);
    assert!(err.needs_upload_retry());
    assert_eq!(fs::read(fixture.remote_path()).expect("read"), remote_before);
    let local = decode_unlocked(&fixture.local_path(), PASSPHRASE);
    assert_eq!(titles(&local), vec!["A", "B"]);

    SyncRound::new(&fixture.settings, &VaultCodec, &fixture.remote)
        .upload_remote()
        .await
        .expect("retry upload");
    assert_eq!(
        fs::read(fixture.remote_path()).expect("remote"),
        fs::read(fixture.local_path()).expect("local")
    );
}

#[tokio::test]
async fn backup_mode_leaves_databases_untouched() {
    let fixture = Fixture::new(vec![entry(1, "A", at(1))], vec![entry(2, "B", at(1))]);
    let local_before = fs::read(fixture.local_path()).expect("read");
    let remote_before = fs::read(fixture.remote_path()).expect("read");

    let report = SyncRound::new(&fixture.settings, &VaultCodec, &fixture.remote)
        .backup()
        .await
        .expect("backup");

    assert!(report.remote_backup.name.ends_with("-vault.kdbx"));
    assert_eq!(fs::read(fixture.local_path()).expect("read"), local_before);
    assert_eq!(fs::read(fixture.remote_path()).expect("read"), remote_before);
    assert_eq!(fs::read(&report.local_backup).expect("read"), local_before);
}
