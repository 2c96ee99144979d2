//! quire CLI - git-compatible loose object store command line interface

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quire::ops::{fsck, import, log, ls_tree, ls_tree_recursive, ImportOptions};
use quire::{
    compute_object_id, CommitInfo, Error, IoResultExt, Object, ObjectKind, Repository, Signature,
    Tree,
};

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "git-compatible loose object store")]
#[command(version)]
struct Cli {
    /// repository path
    #[arg(short = 'C', long, default_value = ".", env = "QUIRE_REPO")]
    repo: PathBuf,

    /// more logging, repeat for more
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// initialize a new repository
    Init {
        /// path to create repository at
        #[arg(default_value = ".")]
        path: PathBuf,

        /// also create this ref with an empty root commit
        #[arg(long)]
        initial_ref: Option<String>,
    },

    /// show contents of an object
    CatFile {
        /// object id or ref
        object: String,

        /// show the object kind instead
        #[arg(short = 't', conflicts_with = "size")]
        kind: bool,

        /// show the payload size instead
        #[arg(short = 's')]
        size: bool,
    },

    /// compute an object id, optionally writing the object
    HashObject {
        /// file to hash, stdin if omitted
        file: Option<PathBuf>,

        /// object kind
        #[arg(short = 't', default_value = "blob")]
        kind: String,

        /// write the object into the store
        #[arg(short = 'w')]
        write: bool,
    },

    /// list tree contents
    LsTree {
        /// ref or commit to list
        rev: Option<String>,

        /// path within tree
        #[arg(short, long)]
        path: Option<String>,

        /// list recursively
        #[arg(short, long)]
        recursive: bool,
    },

    /// show commit log for a ref
    Log {
        /// ref or commit to start from
        rev: Option<String>,

        /// maximum number of commits to show
        #[arg(short = 'n', long)]
        max_count: Option<usize>,
    },

    /// list refs
    Refs {
        /// only refs matching this glob
        pattern: Option<String>,
    },

    /// show ref oid
    ShowRef {
        /// ref name
        ref_name: String,
    },

    /// delete a ref
    DeleteRef {
        /// ref name
        ref_name: String,
    },

    /// resolve a ref to an oid
    RevParse {
        /// ref or oid to resolve
        rev: String,

        /// output short oid (first 12 chars)
        #[arg(long)]
        short: bool,
    },

    /// store a file at a path in a ref's tree and commit
    Put {
        /// path inside the tree
        path: String,

        /// file to read, stdin if omitted
        file: Option<PathBuf>,

        #[command(flatten)]
        commit: CommitArgs,
    },

    /// remove paths from a ref's tree and commit
    Rm {
        /// paths inside the tree
        #[arg(required = true)]
        paths: Vec<String>,

        #[command(flatten)]
        commit: CommitArgs,
    },

    /// move a path within a ref's tree and commit
    Mv {
        /// current path
        src: String,

        /// new path
        dest: String,

        #[command(flatten)]
        commit: CommitArgs,
    },

    /// commit the contents of a directory onto a ref
    Import {
        /// source directory
        source: PathBuf,

        /// directory inside the tree to import into
        #[arg(long)]
        prefix: Option<String>,

        /// drop existing files under the prefix first
        #[arg(long)]
        replace: bool,

        #[command(flatten)]
        commit: CommitArgs,
    },

    /// verify repository integrity
    Fsck,
}

#[derive(clap::Args)]
struct CommitArgs {
    /// ref to update
    #[arg(short = 'r', long = "ref")]
    ref_name: Option<String>,

    /// commit message
    #[arg(short, long, default_value = "")]
    message: String,

    /// author as "Name <email>"
    #[arg(short, long)]
    author: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("QUIRE_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> quire::Result<()> {
    match cli.command {
        Commands::Init { path, initial_ref } => {
            let repo = Repository::init(&path)?;
            if let Some(ref_name) = initial_ref {
                let info = CommitInfo::by(default_signature(&repo), "");
                repo.init_ref(&ref_name, info)?;
            }
            println!("initialized quire repository at {}", path.display());
        }

        Commands::CatFile { object, kind, size } => {
            let repo = Repository::open(&cli.repo)?;
            let oid = quire::resolve_ref(&repo, &object)?;
            let obj = repo.get(&oid)?;

            if kind {
                println!("{}", obj.kind());
            } else if size {
                println!("{}", obj.size());
            } else {
                match obj {
                    Object::Tree(payload) => {
                        let tree = Tree::from_bytes(&payload.into_bytes()?)?;
                        for entry in tree.entries() {
                            println!(
                                "{} {} {}\t{}",
                                entry.mode,
                                entry.mode.type_name(),
                                entry.oid,
                                entry.name
                            );
                        }
                    }
                    other => write_stdout(&other.into_payload().into_bytes()?)?,
                }
            }
        }

        Commands::HashObject { file, kind, write } => {
            let kind: ObjectKind = kind.parse()?;
            if kind == ObjectKind::Tag {
                return Err(Error::InvalidObjectKind(kind.to_string()));
            }
            let content = read_input(file.as_deref())?;

            let oid = if write {
                let repo = Repository::open(&cli.repo)?;
                repo.store(kind, &content)?
            } else {
                compute_object_id(kind.as_str(), &content)
            };
            println!("{}", oid);
        }

        Commands::LsTree {
            rev,
            path,
            recursive,
        } => {
            let repo = Repository::open(&cli.repo)?;
            let rev = rev.unwrap_or_else(|| repo.config().core.default_ref.clone());

            let entries = if recursive {
                ls_tree_recursive(&repo, &rev)?
            } else {
                ls_tree(&repo, &rev, path.as_deref())?
            };

            for entry in entries {
                println!("{}", entry);
            }
        }

        Commands::Log { rev, max_count } => {
            let repo = Repository::open(&cli.repo)?;
            let rev = rev.unwrap_or_else(|| repo.config().core.default_ref.clone());

            for entry in log(&repo, &rev, max_count)? {
                println!("{}", entry);
            }
        }

        Commands::Refs { pattern } => {
            let repo = Repository::open(&cli.repo)?;
            let refs = match pattern {
                Some(pattern) => quire::list_refs_matching(&repo, &pattern)?,
                None => quire::list_refs(&repo)?,
            };

            for ref_name in refs {
                let oid = quire::read_ref(&repo, &ref_name)?;
                println!("{} {}", oid, ref_name);
            }
        }

        Commands::ShowRef { ref_name } => {
            let repo = Repository::open(&cli.repo)?;
            let oid = quire::read_ref(&repo, &ref_name)?;
            println!("{}", oid);
        }

        Commands::DeleteRef { ref_name } => {
            let repo = Repository::open(&cli.repo)?;
            quire::delete_ref(&repo, &ref_name)?;
            println!("deleted ref {}", ref_name);
        }

        Commands::RevParse { rev, short } => {
            let repo = Repository::open(&cli.repo)?;
            let oid = quire::resolve_ref(&repo, &rev)?;
            if short {
                println!("{}", &oid.to_hex()[..12]);
            } else {
                println!("{}", oid);
            }
        }

        Commands::Put { path, file, commit } => {
            let repo = Repository::open(&cli.repo)?;
            let content = read_input(file.as_deref())?;
            let (ref_name, info) = commit.resolve(&repo)?;
            if !quire::ref_exists(&repo, &ref_name) {
                repo.init_ref(&ref_name, info.clone())?;
            }

            let mut tx = repo.start_transaction(&ref_name)?;
            tx.add_or_replace(&path, &content)?;
            println!("{}", tx.commit(info)?);
        }

        Commands::Rm { paths, commit } => {
            let repo = Repository::open(&cli.repo)?;
            let (ref_name, info) = commit.resolve(&repo)?;

            let mut tx = repo.start_transaction(&ref_name)?;
            for path in &paths {
                if !tx.delete(path) {
                    return Err(Error::PathDoesNotExist(path.clone()));
                }
            }
            println!("{}", tx.commit(info)?);
        }

        Commands::Mv { src, dest, commit } => {
            let repo = Repository::open(&cli.repo)?;
            let (ref_name, info) = commit.resolve(&repo)?;

            let mut tx = repo.start_transaction(&ref_name)?;
            tx.move_path(&src, &dest)?;
            println!("{}", tx.commit(info)?);
        }

        Commands::Import {
            source,
            prefix,
            replace,
            commit,
        } => {
            let repo = Repository::open(&cli.repo)?;
            let (ref_name, info) = commit.resolve(&repo)?;

            let options = ImportOptions { prefix, replace };
            let (oid, stats) = import(&repo, &source, &ref_name, info, &options)?;
            println!("{}", oid);
            eprintln!(
                "imported {} files, {} symlinks, skipped {}",
                stats.files, stats.symlinks, stats.skipped
            );
        }

        Commands::Fsck => {
            let repo = Repository::open(&cli.repo)?;
            let report = fsck(&repo)?;

            println!("objects checked: {}", report.objects_checked);

            if !report.corrupt_objects.is_empty() {
                println!("\ncorrupt objects:");
                for obj in &report.corrupt_objects {
                    println!("  {}: {}", obj.oid, obj.message);
                }
            }

            if !report.missing_objects.is_empty() {
                println!("\nmissing objects:");
                for obj in &report.missing_objects {
                    println!(
                        "  {} {} (referenced by {})",
                        obj.kind, obj.oid, obj.referenced_by
                    );
                }
            }

            if !report.dangling_objects.is_empty() {
                println!("\ndangling objects: {}", report.dangling_objects.len());
            }

            if report.is_ok() {
                println!("\nrepository is healthy");
            } else {
                println!("\nrepository has issues");
                return Err(Error::IntegrityCheckFailed);
            }
        }
    }

    Ok(())
}

impl CommitArgs {
    /// target ref and commit info, falling back to the repository config
    fn resolve(self, repo: &Repository) -> quire::Result<(String, CommitInfo)> {
        let ref_name = self
            .ref_name
            .unwrap_or_else(|| repo.config().core.default_ref.clone());

        let signature = match self.author {
            Some(author) => {
                // "Name <email>" without a timestamp, stamp it now
                let parsed: Signature = author.parse()?;
                Signature::now(parsed.name, parsed.email)
            }
            None => default_signature(repo),
        };

        let mut message = self.message;
        if !message.is_empty() && !message.ends_with('\n') {
            message.push('\n');
        }
        Ok((ref_name, CommitInfo::by(signature, message)))
    }
}

fn default_signature(repo: &Repository) -> Signature {
    repo.config()
        .signature()
        .unwrap_or_else(|| Signature::now("quire", "quire@localhost"))
}

fn read_input(file: Option<&Path>) -> quire::Result<Vec<u8>> {
    match file {
        Some(path) => fs::read(path).with_path(path),
        None => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf).with_path("stdin")?;
            Ok(buf)
        }
    }
}

fn write_stdout(data: &[u8]) -> quire::Result<()> {
    io::stdout().write_all(data).with_path("stdout")
}
