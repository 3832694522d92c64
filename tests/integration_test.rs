use tempfile::tempdir;
use uuid::Uuid;
use vaultfs::archive::Archive;

fn key() -> [u8; 32] {
    [11u8; 32]
}

#[test]
fn create_nested_write_reopen_read_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("archive.vlt");

    {
        let mut ar = Archive::create(&path, key(), Uuid::nil(), Uuid::nil(), Uuid::nil(), "integration".into()).unwrap();
        ar.mkdir("/projects").unwrap();
        ar.mkdir("/projects/vaultfs").unwrap();
        let mut f = ar.open("/projects/vaultfs/README.md", "w+").unwrap();
        f.write(b"# vaultfs\n\nencrypted archive filesystem\n").unwrap();
        ar.close_file(f).unwrap();

        ar.symlink("/projects/vaultfs/README.md", "/README.md").unwrap();
        ar.close().unwrap();
    }

    {
        let mut ar = Archive::open(&path, key()).unwrap();

        let mut f = ar.open("/projects/vaultfs/README.md", "r").unwrap();
        let data = f.read_to_end().unwrap();
        ar.close_file(f).unwrap();
        assert_eq!(data, b"# vaultfs\n\nencrypted archive filesystem\n");

        let mut via_link = ar.open("/README.md", "r").unwrap();
        let linked = via_link.read_to_end().unwrap();
        ar.close_file(via_link).unwrap();
        assert_eq!(linked, data);

        let listing = ar.listdir("/projects/vaultfs").unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "README.md");

        let stats = ar.stats();
        assert_eq!(stats.title, "integration");
        assert!(stats.streams_in_use >= 4);

        ar.close().unwrap();
    }
}

#[test]
fn wrong_key_fails_to_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("archive.vlt");
    {
        let ar = Archive::create(&path, key(), Uuid::nil(), Uuid::nil(), Uuid::nil(), "t".into()).unwrap();
        ar.close().unwrap();
    }
    let wrong_key = [12u8; 32];
    assert!(Archive::open(&path, wrong_key).is_err());
}

#[test]
fn fsck_reports_full_health_on_clean_archive() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("archive.vlt");
    {
        let mut ar = Archive::create(&path, key(), Uuid::nil(), Uuid::nil(), Uuid::nil(), "t".into()).unwrap();
        let mut f = ar.open("/data.bin", "w+").unwrap();
        f.write(&vec![0x5Au8; 50_000]).unwrap();
        ar.close_file(f).unwrap();
        ar.close().unwrap();
    }
    let report = vaultfs::fsck::scan_file(&path, key()).unwrap();
    assert_eq!(report.quality, vaultfs::ScanQuality::Full);
    assert_eq!(report.corrupt, 0);
}
