use async_trait::async_trait;
use backup::metadata::Part;
use backup::{
    BackupDestination, BackupFormat, BackupMetadata, DataFormat, DownloadError, Downloader,
    ErrorKind, RemoteBackup, RemoteStorage, TableMetadata, TableTitle,
};
use clickhouse::{DatabaseControl, Disk};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use storage::{CompressionFormat, FsProvider, ObjectReader, StorageError};
use tempfile::TempDir;

/// In-memory remote that records every call it receives.
#[derive(Default)]
struct FakeRemote {
    backups: Vec<RemoteBackup>,
    objects: HashMap<String, Vec<u8>>,
    fail_on: Option<String>,
    fail_listing: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeRemote {
    fn with_backup(backup: RemoteBackup) -> Self {
        Self {
            backups: vec![backup],
            ..Default::default()
        }
    }

    fn add_table(&mut self, backup: &str, table: &TableMetadata) {
        self.objects.insert(
            format!("{backup}/metadata/{}/{}.json", table.database, table.table),
            serde_json::to_vec(table).unwrap(),
        );
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn transfers(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with("stream ") || c.starts_with("path ") || c.starts_with("legacy "))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn unpack_marker(&self, path: &str, local_dir: &Path) -> Result<(), StorageError> {
        if self.fail_on.as_deref() == Some(path) {
            return Err(StorageError::Unexpected(format!("{path} is corrupt")));
        }
        fs::create_dir_all(local_dir)?;
        let name = path.rsplit('/').next().unwrap_or(path);
        fs::write(local_dir.join(format!("{name}.restored")), path)?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStorage for FakeRemote {
    async fn list_backups(&self) -> Result<Vec<RemoteBackup>, StorageError> {
        self.record("list".to_string());
        if self.fail_listing {
            return Err(StorageError::Unexpected("listing timed out".to_string()));
        }
        Ok(self.backups.clone())
    }

    async fn open_reader(&self, path: &str) -> Result<ObjectReader, StorageError> {
        self.record(format!("open {path}"));
        match self.objects.get(path) {
            Some(body) => Ok(Box::pin(Cursor::new(body.clone()))),
            None => Err(StorageError::NotFound(path.to_string())),
        }
    }

    async fn compressed_stream_download(
        &self,
        path: &str,
        local_dir: &Path,
    ) -> Result<(), StorageError> {
        self.record(format!("stream {path}"));
        self.unpack_marker(path, local_dir)
    }

    async fn download_path(&self, path: &str, local_dir: &Path) -> Result<(), StorageError> {
        self.record(format!("path {path}"));
        self.unpack_marker(path, local_dir)
    }

    async fn legacy_download(
        &self,
        backup: &RemoteBackup,
        local_dir: &Path,
    ) -> Result<(), StorageError> {
        self.record(format!("legacy {}", backup.name));
        self.unpack_marker(&backup.name, local_dir)
    }
}

struct FakeDb {
    data_path: PathBuf,
    disks: Vec<Disk>,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeDb {
    fn new(data_path: &Path) -> Self {
        Self {
            data_path: data_path.to_path_buf(),
            disks: vec![Disk {
                name: "default".to_string(),
                path: data_path.display().to_string(),
            }],
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatabaseControl for FakeDb {
    async fn connect(&self) -> clickhouse::Result<()> {
        self.calls.lock().unwrap().push("connect");
        Ok(())
    }

    async fn close(&self) {
        self.calls.lock().unwrap().push("close");
    }

    async fn default_path(&self) -> clickhouse::Result<PathBuf> {
        self.calls.lock().unwrap().push("default_path");
        Ok(self.data_path.clone())
    }

    async fn disks(&self) -> clickhouse::Result<Vec<Disk>> {
        self.calls.lock().unwrap().push("disks");
        Ok(self.disks.clone())
    }
}

fn current_backup(name: &str, format: DataFormat, tables: &[(&str, &str)]) -> RemoteBackup {
    RemoteBackup {
        name: name.to_string(),
        format: BackupFormat::Current(format),
        metadata: BackupMetadata {
            backup_name: name.to_string(),
            data_format: match format {
                DataFormat::Directory => "directory".to_string(),
                DataFormat::Archive => String::new(),
            },
            data_size: 1,
            metadata_size: 1,
            tables: tables.iter().map(|(d, t)| TableTitle::new(d, t)).collect(),
            ..Default::default()
        },
        broken: None,
        archive: None,
    }
}

fn legacy_backup(name: &str) -> RemoteBackup {
    RemoteBackup {
        name: name.to_string(),
        format: BackupFormat::Legacy,
        metadata: BackupMetadata {
            backup_name: name.to_string(),
            data_size: 2048,
            ..Default::default()
        },
        broken: None,
        archive: Some(format!("{name}.tar.gz")),
    }
}

fn archive_table(name: &str, disks: &[&str], total_bytes: u64) -> TableMetadata {
    TableMetadata {
        database: "d".to_string(),
        table: name.to_string(),
        files: disks
            .iter()
            .map(|d| (d.to_string(), vec![format!("{d}_1.tar.gz"), format!("{d}_2.tar.gz")]))
            .collect(),
        query: format!("CREATE TABLE d.{name} (x UInt8) ENGINE = MergeTree ORDER BY x"),
        total_bytes,
        ..Default::default()
    }
}

fn directory_table(name: &str, disks: &[&str], total_bytes: u64) -> TableMetadata {
    TableMetadata {
        database: "d".to_string(),
        table: name.to_string(),
        parts: disks
            .iter()
            .map(|d| (d.to_string(), vec![Part::new("all_1_1_0")]))
            .collect(),
        query: format!("CREATE TABLE d.{name} (x UInt8) ENGINE = MergeTree ORDER BY x"),
        total_bytes,
        ..Default::default()
    }
}

fn read_descriptor(data_path: &Path, name: &str) -> BackupMetadata {
    let body = fs::read(data_path.join("backup").join(name).join("metadata.json")).unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn existing_local_backup_stops_before_any_remote_call() {
    let data = TempDir::new().unwrap();
    fs::create_dir_all(data.path().join("backup/B1")).unwrap();
    let remote = FakeRemote::with_backup(current_backup("B1", DataFormat::Directory, &[("d", "t1")]));
    let db = FakeDb::new(data.path());

    let err = Downloader::new(&remote, &db)
        .run("B1", "", false, &mut Vec::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::AlreadyExists(ref name) if name == "B1"));
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(remote.calls().is_empty());
    assert_eq!(db.calls(), vec!["connect", "default_path", "close"]);
}

#[tokio::test]
async fn empty_name_lists_remote_backups_without_the_database() {
    let data = TempDir::new().unwrap();
    let mut remote = FakeRemote::with_backup(current_backup("B1", DataFormat::Archive, &[]));
    remote.backups.push(legacy_backup("L1"));
    let db = FakeDb::new(data.path());
    let mut out = Vec::new();

    let err = Downloader::new(&remote, &db)
        .run("", "", false, &mut out)
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::SelectionRequired));
    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("B1"));
    assert!(out.contains("L1"));
    assert!(out.contains("old-format"));
    assert!(db.calls().is_empty());
}

#[tokio::test]
async fn empty_name_requires_selection_when_listing_fails() {
    let data = TempDir::new().unwrap();
    let mut remote = FakeRemote::with_backup(current_backup("B1", DataFormat::Archive, &[]));
    remote.fail_listing = true;
    let db = FakeDb::new(data.path());
    let mut out = Vec::new();

    let err = Downloader::new(&remote, &db)
        .run("", "", false, &mut out)
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::SelectionRequired));
    assert!(out.is_empty());
    assert_eq!(remote.calls(), vec!["list"]);
    assert!(db.calls().is_empty());
}

#[tokio::test]
async fn unknown_remote_name_is_not_found() {
    let data = TempDir::new().unwrap();
    let mut remote = FakeRemote::with_backup(current_backup("B1", DataFormat::Archive, &[]));
    remote.backups.push(RemoteBackup {
        broken: Some("can't parse metadata.json".to_string()),
        ..current_backup("B2", DataFormat::Archive, &[])
    });
    let db = FakeDb::new(data.path());

    for name in ["B3", "B2"] {
        let err = Downloader::new(&remote, &db)
            .run(name, "", false, &mut Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::NotFound(ref n) if n == name));
    }
}

#[tokio::test]
async fn unknown_disk_blocks_every_transfer() {
    let data = TempDir::new().unwrap();
    let mut remote = FakeRemote::with_backup(current_backup(
        "B1",
        DataFormat::Archive,
        &[("d", "t1"), ("d", "t2")],
    ));
    remote.add_table("B1", &archive_table("t1", &["default"], 10));
    remote.add_table("B1", &archive_table("t2", &["hdd"], 20));
    let db = FakeDb::new(data.path());

    let err = Downloader::new(&remote, &db)
        .run("B1", "", false, &mut Vec::new())
        .await
        .unwrap_err();

    match &err {
        DownloadError::UnknownDisk { backup, table, disk } => {
            assert_eq!(backup, "B1");
            assert_eq!(table, "d.t2");
            assert_eq!(disk, "hdd");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.kind(), ErrorKind::Topology);
    assert!(remote.transfers().is_empty());
    assert!(!data.path().join("backup/B1/metadata.json").exists());
    assert_eq!(db.calls().last(), Some(&"close"));
}

#[tokio::test]
async fn configured_disk_mapping_resolves_missing_disks() {
    let data = TempDir::new().unwrap();
    let hdd = TempDir::new().unwrap();
    let mut remote = FakeRemote::with_backup(current_backup("B1", DataFormat::Archive, &[("d", "t2")]));
    remote.add_table("B1", &archive_table("t2", &["hdd"], 20));
    let db = FakeDb::new(data.path());
    let mut mapping = BTreeMap::new();
    mapping.insert("hdd".to_string(), hdd.path().display().to_string());

    let summary = Downloader::new(&remote, &db)
        .with_disk_mapping(mapping)
        .run("B1", "", false, &mut Vec::new())
        .await
        .unwrap();

    assert_eq!(summary.data_size, 20);
    assert!(hdd
        .path()
        .join("backup/B1/shadow/d/t2/hdd/hdd_1.tar.gz.restored")
        .exists());
}

#[tokio::test]
async fn legacy_backup_rejects_table_selection_and_schema_only() {
    let data = TempDir::new().unwrap();
    let remote = FakeRemote::with_backup(legacy_backup("L1"));
    let db = FakeDb::new(data.path());

    let err = Downloader::new(&remote, &db)
        .run("L1", "d.t1", false, &mut Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOnLegacyFormat);
    assert_eq!(remote.calls(), vec!["list"]);

    let err = Downloader::new(&remote, &db)
        .run("L1", "", true, &mut Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOnLegacyFormat);
    assert!(remote.transfers().is_empty());
}

#[tokio::test]
async fn legacy_backup_is_downloaded_whole() {
    let data = TempDir::new().unwrap();
    let remote = FakeRemote::with_backup(legacy_backup("L1"));
    let db = FakeDb::new(data.path());

    let summary = Downloader::new(&remote, &db)
        .run("L1", "", false, &mut Vec::new())
        .await
        .unwrap();

    assert_eq!(summary.format, BackupFormat::Legacy);
    assert_eq!(summary.data_size, 2048);
    assert_eq!(remote.transfers(), vec!["legacy L1"]);
    assert!(data.path().join("backup/L1/L1.restored").exists());
    assert!(!db.calls().contains(&"disks"));
}

#[tokio::test]
async fn schema_only_skips_data_and_disks() {
    let data = TempDir::new().unwrap();
    let mut remote = FakeRemote::with_backup(current_backup(
        "B1",
        DataFormat::Directory,
        &[("d", "t1"), ("d", "t2")],
    ));
    remote.add_table("B1", &directory_table("t1", &["default"], 100));
    // an unknown disk does not matter without data
    remote.add_table("B1", &directory_table("t2", &["cold"], 200));
    let db = FakeDb::new(data.path());

    let summary = Downloader::new(&remote, &db)
        .run("B1", "", true, &mut Vec::new())
        .await
        .unwrap();

    assert_eq!(summary.data_size, 0);
    assert!(remote.transfers().is_empty());
    assert!(!db.calls().contains(&"disks"));

    let descriptor = read_descriptor(data.path(), "B1");
    assert_eq!(descriptor.data_size, 0);
    assert_eq!(descriptor.tables.len(), 2);
    assert!(descriptor.metadata_size > 0);

    let t1: TableMetadata = serde_json::from_slice(
        &fs::read(data.path().join("backup/B1/metadata/d/t1.json")).unwrap(),
    )
    .unwrap();
    assert!(t1.parts.is_empty());
    assert_eq!(t1.total_bytes, 0);
    assert!(t1.metadata_only);
    assert_eq!(t1.query, directory_table("t1", &[], 0).query);
}

#[tokio::test]
async fn pattern_restricts_tables_and_accounting() {
    let data = TempDir::new().unwrap();
    let mut remote = FakeRemote::with_backup(current_backup(
        "B1",
        DataFormat::Archive,
        &[("d", "t1"), ("d", "t2"), ("d", "v1")],
    ));
    remote.add_table("B1", &archive_table("t1", &["default"], 10));
    remote.add_table("B1", &archive_table("t2", &["default"], 20));
    remote.add_table(
        "B1",
        &TableMetadata {
            metadata_only: true,
            total_bytes: 99,
            ..archive_table("v1", &[], 0)
        },
    );
    let db = FakeDb::new(data.path());

    let summary = Downloader::new(&remote, &db)
        .run("B1", "d.t1,d.v*", false, &mut Vec::new())
        .await
        .unwrap();

    // metadata-only tables add nothing to the data size
    assert_eq!(summary.data_size, 10);
    assert_eq!(summary.tables, 2);
    let mut transfers = remote.transfers();
    transfers.sort();
    assert_eq!(
        transfers,
        vec![
            "stream B1/shadow/d/t1/default_1.tar.gz",
            "stream B1/shadow/d/t1/default_2.tar.gz",
        ]
    );

    let descriptor = read_descriptor(data.path(), "B1");
    assert_eq!(
        descriptor.tables,
        vec![TableTitle::new("d", "t1"), TableTitle::new("d", "v1")]
    );
    let t1_len = fs::metadata(data.path().join("backup/B1/metadata/d/t1.json")).unwrap().len();
    let v1_len = fs::metadata(data.path().join("backup/B1/metadata/d/v1.json")).unwrap().len();
    assert_eq!(descriptor.metadata_size, t1_len + v1_len);
    assert!(!data.path().join("backup/B1/metadata/d/t2.json").exists());
}

#[tokio::test]
async fn missing_table_descriptor_aborts_the_download() {
    let data = TempDir::new().unwrap();
    let mut remote = FakeRemote::with_backup(current_backup(
        "B1",
        DataFormat::Archive,
        &[("d", "t1"), ("d", "t2")],
    ));
    remote.add_table("B1", &archive_table("t1", &["default"], 10));
    let db = FakeDb::new(data.path());

    let err = Downloader::new(&remote, &db)
        .run("B1", "", false, &mut Vec::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::RemoteRead { ref path, .. } if path == "B1/metadata/d/t2.json"));
    assert!(remote.transfers().is_empty());
    assert!(!data.path().join("backup/B1/metadata.json").exists());
}

#[tokio::test]
async fn failed_transfer_is_reported_with_table_and_disk() {
    let data = TempDir::new().unwrap();
    let mut remote = FakeRemote::with_backup(current_backup("B1", DataFormat::Archive, &[("d", "t1")]));
    remote.add_table("B1", &archive_table("t1", &["default"], 10));
    remote.fail_on = Some("B1/shadow/d/t1/default_1.tar.gz".to_string());
    let db = FakeDb::new(data.path());

    let err = Downloader::new(&remote, &db)
        .with_concurrency(1)
        .run("B1", "", false, &mut Vec::new())
        .await
        .unwrap_err();

    match &err {
        DownloadError::Transfer { backup, table, disk, .. } => {
            assert_eq!(backup, "B1");
            assert_eq!(table, "d.t1");
            assert_eq!(disk, "default");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.kind(), ErrorKind::Transfer);
    // members of a disk are taken in order, the failing first one ends it
    assert_eq!(remote.transfers(), vec!["stream B1/shadow/d/t1/default_1.tar.gz"]);
    assert!(!data.path().join("backup/B1/metadata.json").exists());
    // already written table metadata stays in place
    assert!(data.path().join("backup/B1/metadata/d/t1.json").exists());
}

#[tokio::test]
async fn failing_disk_stops_a_concurrent_download() {
    let data = TempDir::new().unwrap();
    let hot = TempDir::new().unwrap();
    let mut remote = FakeRemote::with_backup(current_backup(
        "B1",
        DataFormat::Archive,
        &[("d", "t1"), ("d", "t2")],
    ));
    remote.add_table("B1", &archive_table("t1", &["default", "hot"], 10));
    remote.add_table("B1", &archive_table("t2", &["default", "hot"], 20));
    remote.fail_on = Some("B1/shadow/d/t1/hot_1.tar.gz".to_string());
    let mut db = FakeDb::new(data.path());
    db.disks.push(Disk {
        name: "hot".to_string(),
        path: hot.path().display().to_string(),
    });

    let err = Downloader::new(&remote, &db)
        .with_concurrency(4)
        .run("B1", "", false, &mut Vec::new())
        .await
        .unwrap_err();

    match &err {
        DownloadError::Transfer { table, disk, .. } => {
            assert_eq!(table, "d.t1");
            assert_eq!(disk, "hot");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.kind(), ErrorKind::Transfer);
    let transfers = remote.transfers();
    assert!(transfers.contains(&"stream B1/shadow/d/t1/hot_1.tar.gz".to_string()));
    assert!(!transfers.contains(&"stream B1/shadow/d/t1/hot_2.tar.gz".to_string()));
    assert!(!data.path().join("backup/B1/metadata.json").exists());
    assert!(!hot.path().join("backup/B1/metadata.json").exists());
}

/// The directory-mode scenario end to end over a filesystem remote.
#[tokio::test]
async fn directory_backup_is_mirrored_from_filesystem_remote() {
    let remote_root = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let root = remote_root.path();

    let t1_json = r#"{
        "table": "t1",
        "database": "d",
        "parts": {"default": [{"name": "all_1_1_0", "hash_of_all_files": "f0e1d2", "partition_id": "all"}]},
        "query": "CREATE TABLE d.t1 (x UInt8) ENGINE = MergeTree ORDER BY x",
        "total_bytes": 1234,
        "dependencies_table": "mv1",
        "dependencies_database": "d",
        "metadata_only": false
    }"#;
    let mut descriptor = current_backup("B1", DataFormat::Directory, &[("d", "t1")]).metadata;
    descriptor
        .extra
        .insert("rbac_size".to_string(), serde_json::json!(12));
    fs::create_dir_all(root.join("B1/metadata/d")).unwrap();
    fs::write(root.join("B1/metadata.json"), serde_json::to_vec(&descriptor).unwrap()).unwrap();
    fs::write(root.join("B1/metadata/d/t1.json"), t1_json).unwrap();
    let part = root.join("B1/shadow/d/t1/default/all_1_1_0");
    fs::create_dir_all(&part).unwrap();
    fs::write(part.join("data.bin"), b"0123456789").unwrap();
    fs::write(part.join("checksums.txt"), b"checksums").unwrap();

    let destination = BackupDestination::new(
        Box::new(FsProvider::new(root).unwrap()),
        "",
        CompressionFormat::Gzip,
    );
    let db = FakeDb::new(data.path());

    let summary = Downloader::new(&destination, &db)
        .run("B1", "", false, &mut Vec::new())
        .await
        .unwrap();

    assert_eq!(summary.format, BackupFormat::Current(DataFormat::Directory));
    let local = data.path().join("backup/B1");
    assert_eq!(
        fs::read(local.join("shadow/d/t1/default/all_1_1_0/data.bin")).unwrap(),
        b"0123456789"
    );
    assert!(local.join("shadow/d/t1/default/all_1_1_0/checksums.txt").exists());

    // the local copy keeps every field of the remote document
    let restored: serde_json::Value =
        serde_json::from_slice(&fs::read(local.join("metadata/d/t1.json")).unwrap()).unwrap();
    let source: serde_json::Value = serde_json::from_str(t1_json).unwrap();
    assert_eq!(restored, source);

    let descriptor = read_descriptor(data.path(), "B1");
    assert_eq!(descriptor.data_size, 1234);
    assert!(descriptor.data_format.is_empty());
    assert_eq!(descriptor.tables, vec![TableTitle::new("d", "t1")]);
    assert_eq!(descriptor.extra["rbac_size"], 12);
    assert_eq!(
        descriptor.metadata_size,
        fs::metadata(local.join("metadata/d/t1.json")).unwrap().len()
    );
}

#[tokio::test]
async fn archive_members_are_unpacked_from_filesystem_remote() {
    let remote_root = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let root = remote_root.path();

    let t1 = TableMetadata {
        database: "d".to_string(),
        table: "t1".to_string(),
        files: [("default".to_string(), vec!["default_1.tar.gz".to_string()])]
            .into_iter()
            .collect(),
        total_bytes: 5,
        ..Default::default()
    };
    fs::create_dir_all(root.join("B1/metadata/d")).unwrap();
    fs::create_dir_all(root.join("B1/shadow/d/t1")).unwrap();
    fs::write(
        root.join("B1/metadata.json"),
        serde_json::to_vec(&current_backup("B1", DataFormat::Archive, &[("d", "t1")]).metadata)
            .unwrap(),
    )
    .unwrap();
    fs::write(root.join("B1/metadata/d/t1.json"), serde_json::to_vec(&t1).unwrap()).unwrap();

    let archive = fs::File::create(root.join("B1/shadow/d/t1/default_1.tar.gz")).unwrap();
    let encoder = flate2::write::GzEncoder::new(archive, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut header = tar::Header::new_gnu();
    header.set_size(5);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "all_1_1_0/data.bin", &b"hello"[..])
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap();

    let destination = BackupDestination::new(
        Box::new(FsProvider::new(root).unwrap()),
        "",
        CompressionFormat::Gzip,
    );
    let db = FakeDb::new(data.path());

    let summary = Downloader::new(&destination, &db)
        .run("B1", "", false, &mut Vec::new())
        .await
        .unwrap();

    assert_eq!(summary.data_size, 5);
    assert_eq!(
        fs::read(data.path().join("backup/B1/shadow/d/t1/default/all_1_1_0/data.bin")).unwrap(),
        b"hello"
    );
}
