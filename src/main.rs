use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;
use vaultfs::archive::Archive;
use vaultfs::crypto::derive_key;
use vaultfs::fsck;
use vaultfs::Compression;

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CompressionArg {
    None,
    Zip,
    Gzip,
    Bzip2,
}

impl From<CompressionArg> for Compression {
    fn from(v: CompressionArg) -> Compression {
        match v {
            CompressionArg::None => Compression::None,
            CompressionArg::Zip => Compression::Zip,
            CompressionArg::Gzip => Compression::Gzip,
            CompressionArg::Bzip2 => Compression::Bzip2,
        }
    }
}

#[derive(Parser)]
#[command(name = "vaultfs", version = "0.1.0", about = "Encrypted single-file virtual archive with a POSIX-like filesystem inside")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a brand new archive
    Create {
        archive: PathBuf,
        #[arg(short, long)]
        password: String,
        #[arg(short, long, default_value = "")]
        title: String,
    },
    /// Create a directory inside the archive
    Mkdir {
        archive: PathBuf,
        #[arg(short, long)]
        password: String,
        path: String,
    },
    /// List a directory's contents
    Ls {
        archive: PathBuf,
        #[arg(short, long)]
        password: String,
        #[arg(default_value = "/")]
        path: String,
    },
    /// Print a file's contents to stdout
    Cat {
        archive: PathBuf,
        #[arg(short, long)]
        password: String,
        path: String,
    },
    /// Copy a file from the host filesystem into the archive
    Put {
        archive: PathBuf,
        #[arg(short, long)]
        password: String,
        host_path: PathBuf,
        archive_path: String,
        /// Compression to store a newly created file's stream with
        #[arg(short, long, value_enum, default_value_t = CompressionArg::None)]
        compress: CompressionArg,
    },
    /// Copy a file out of the archive to the host filesystem
    Get {
        archive: PathBuf,
        #[arg(short, long)]
        password: String,
        archive_path: String,
        host_path: PathBuf,
    },
    /// Remove a file
    Rm {
        archive: PathBuf,
        #[arg(short, long)]
        password: String,
        path: String,
    },
    /// Remove an empty directory
    Rmdir {
        archive: PathBuf,
        #[arg(short, long)]
        password: String,
        path: String,
    },
    /// Rename or move an entry
    Mv {
        archive: PathBuf,
        #[arg(short, long)]
        password: String,
        src: String,
        dst: String,
    },
    /// Show metadata for a path
    Stat {
        archive: PathBuf,
        #[arg(short, long)]
        password: String,
        path: String,
    },
    /// Create a symlink-style entry pointing at an existing path
    Symlink {
        archive: PathBuf,
        #[arg(short, long)]
        password: String,
        target: String,
        link_path: String,
    },
    /// Show archive-wide statistics
    Info {
        archive: PathBuf,
        #[arg(short, long)]
        password: String,
    },
    /// Scan every block for corruption, independent of the registries above
    Fsck {
        archive: PathBuf,
        #[arg(short, long)]
        password: String,
        /// Print per-block health log
        #[arg(long)]
        verbose: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Commands::Create { archive, password, title } => {
            let key = derive_archive_key(&archive, &password)?;
            let ar = Archive::create(&archive, key, Uuid::nil(), Uuid::nil(), Uuid::nil(), title)?;
            let stats = ar.stats();
            ar.close()?;
            println!("Created: {}", archive.display());
            println!("  identity: {}", stats.id);
        }

        Commands::Mkdir { archive, password, path } => {
            let mut ar = open_archive(&archive, &password)?;
            ar.mkdir(&path)?;
            ar.close()?;
            println!("mkdir: {}", path);
        }

        Commands::Ls { archive, password, path } => {
            let ar = open_archive(&archive, &password)?;
            let entries = ar.listdir(&path)?;
            println!("{:<32} {:>10} {:>6}  type", "name", "size", "perms");
            for e in entries {
                let kind = match e.entry_type {
                    vaultfs::EntryType::File => "file",
                    vaultfs::EntryType::Directory => "dir",
                    vaultfs::EntryType::Link => "link",
                };
                println!("{:<32} {:>10} {:>06o}  {}", e.name, e.size, e.perms, kind);
            }
        }

        Commands::Cat { archive, password, path } => {
            let mut ar = open_archive(&archive, &password)?;
            let mut f = ar.open(&path, "r")?;
            let data = f.read_to_end()?;
            ar.close_file(f)?;
            use std::io::Write;
            std::io::stdout().write_all(&data)?;
        }

        Commands::Put { archive, password, host_path, archive_path, compress } => {
            let data = std::fs::read(&host_path)?;
            let mut ar = open_archive(&archive, &password)?;
            let mut f = ar.open_with_compression(&archive_path, "w+", compress.into())?;
            f.write(&data)?;
            ar.close_file(f)?;
            println!("put: {} ({} B) -> {}", host_path.display(), data.len(), archive_path);
        }

        Commands::Get { archive, password, archive_path, host_path } => {
            let mut ar = open_archive(&archive, &password)?;
            let mut f = ar.open(&archive_path, "r")?;
            let data = f.read_to_end()?;
            ar.close_file(f)?;
            std::fs::write(&host_path, &data)?;
            println!("get: {} ({} B) -> {}", archive_path, data.len(), host_path.display());
        }

        Commands::Rm { archive, password, path } => {
            let mut ar = open_archive(&archive, &password)?;
            ar.unlink(&path)?;
            ar.close()?;
            println!("removed: {}", path);
        }

        Commands::Rmdir { archive, password, path } => {
            let mut ar = open_archive(&archive, &password)?;
            ar.rmdir(&path)?;
            ar.close()?;
            println!("removed directory: {}", path);
        }

        Commands::Mv { archive, password, src, dst } => {
            let mut ar = open_archive(&archive, &password)?;
            ar.rename(&src, &dst)?;
            ar.close()?;
            println!("moved: {} -> {}", src, dst);
        }

        Commands::Stat { archive, password, path } => {
            let ar = open_archive(&archive, &password)?;
            let e = ar.stat(&path)?;
            println!("  path:     {}", path);
            println!("  id:       {}", e.id);
            println!("  type:     {:?}", e.entry_type);
            println!("  size:     {} B", e.size);
            if e.compression != Compression::None {
                println!("  stored:   {} B ({})", e.length, e.compression.name());
            }
            println!("  perms:    {:06o}", e.perms);
            println!("  owner:    {} ({}:{})", e.owner, e.user, e.group);
            println!("  created:  {}", e.created);
            println!("  modified: {}", e.modified);
        }

        Commands::Symlink { archive, password, target, link_path } => {
            let mut ar = open_archive(&archive, &password)?;
            ar.symlink(&target, &link_path)?;
            ar.close()?;
            println!("symlink: {} -> {}", link_path, target);
        }

        Commands::Info { archive, password } => {
            let ar = open_archive(&archive, &password)?;
            let stats = ar.stats();
            println!("── vaultfs archive ──────────────────────────────────────");
            println!("  path            {}", archive.display());
            println!("  type/role       {}/{}", stats.archive_type, stats.role);
            println!("  identity        {}", stats.id);
            println!("  owner           {}", stats.owner);
            println!("  domain          {}", stats.domain);
            println!("  node            {}", stats.node);
            println!("  title           {}", stats.title);
            println!("  created         {}", stats.created);
            println!("  streams in use  {}", stats.streams_in_use);
        }

        Commands::Fsck { archive, password, verbose } => {
            let key = derive_archive_key(&archive, &password)?;
            let report = fsck::scan_file(&archive, key)?;
            println!("── fsck ──────────────────────────────────────────────────");
            println!("  {}", report.summary());
            println!("  scanned:  {}", report.total_scanned);
            println!("  healthy:  {}", report.healthy);
            println!("  corrupt:  {}", report.corrupt);
            if verbose {
                println!();
                for (idx, health) in &report.block_log {
                    match health {
                        fsck::BlockHealth::Healthy => println!("  [{idx:8}] ok"),
                        fsck::BlockHealth::Corrupt { reason } => println!("  [{idx:8}] CORRUPT: {reason}"),
                    }
                }
            }
        }
    }

    Ok(())
}

fn open_archive(path: &PathBuf, password: &str) -> Result<Archive, Box<dyn std::error::Error>> {
    let key = derive_archive_key(path, password)?;
    Ok(Archive::open(path, key)?)
}

/// The core archive API takes a raw 32-byte key (§crypto) — it never sees a
/// password. The CLI derives that key with Argon2id, salted on the
/// archive's own path so the same password yields different keys for
/// different archives on disk.
fn derive_archive_key(path: &PathBuf, password: &str) -> Result<[u8; 32], Box<dyn std::error::Error>> {
    let salt = Uuid::new_v5(&Uuid::NAMESPACE_OID, path.as_os_str().to_string_lossy().as_bytes());
    Ok(derive_key(password, salt.as_bytes())?)
}
