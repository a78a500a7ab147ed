//! ocizub CLI - merge container image layers into store commits

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ocizub::label::{FileContexts, Labeler, NoLabels};
use ocizub::ops::{
    checkout, commit, commit_metadata, count_files, import_image, merge_image, CommandImageCopy,
    CommandPostprocess, ImportConfig, ImportHooks, ImportOutcome, LayerCheckoutOptions,
    NoPostprocess, Postprocess,
};
use ocizub::refcodec::{image_name_from_ref, IMAGE_REF_PREFIX};
use ocizub::{image_ref_for, layer_ref, CheckoutMode, Repo};

#[derive(Parser)]
#[command(name = "ocizub")]
#[command(about = "merge container image layers into a single content-addressed commit")]
#[command(version)]
struct Cli {
    /// repository path
    #[arg(short, long, env = "OCIZUB_REPO", default_value = ".")]
    repo: PathBuf,

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
    },

    /// commit a directory to a ref (e.g. an unpacked layer to its layer ref)
    Commit {
        /// source directory to commit
        source: PathBuf,

        #[command(flatten)]
        target: CommitTarget,

        /// commit message
        #[arg(short, long)]
        message: Option<String>,

        /// author name
        #[arg(short, long)]
        author: Option<String>,
    },

    /// fetch an image with the copy program, then merge its layers
    Import {
        /// image name, e.g. quay.io/fedora/fedora:40
        image: String,

        /// program that copies an image into the repository
        #[arg(long, env = "OCIZUB_COPY_PROGRAM")]
        copy_program: String,

        /// extra argument for the copy program (repeatable)
        #[arg(long = "copy-arg")]
        copy_args: Vec<String>,

        #[command(flatten)]
        merge: MergeArgs,
    },

    /// merge the layers of an image already in the repository
    Merge {
        /// image name, e.g. quay.io/fedora/fedora:40
        image: String,

        #[command(flatten)]
        merge: MergeArgs,
    },

    /// print the ref a layer digest is stored under
    LayerRef {
        digest: String,
    },

    /// print the ref an image is stored under
    ImageRef {
        image: String,
    },

    /// list refs
    Refs {
        /// only refs matching this glob pattern
        #[arg(short, long)]
        pattern: Option<String>,

        /// list imported images by name
        #[arg(long, conflicts_with = "pattern")]
        images: bool,
    },

    /// show ref hash
    ShowRef {
        /// ref name
        ref_name: String,
    },

    /// show the provenance recorded on an imported commit
    ShowMetadata {
        /// ref or commit hash
        rev: String,

        /// print only the manifest
        #[arg(long)]
        manifest: bool,
    },

    /// checkout a ref to a directory
    Checkout {
        /// ref to checkout
        ref_name: String,

        /// destination directory
        destination: PathBuf,

        /// use copy instead of hardlinks
        #[arg(long)]
        copy: bool,
    },
}

/// where a commit goes: exactly one of a ref name or a layer digest
#[derive(Args)]
#[group(required = true, multiple = false)]
struct CommitTarget {
    /// ref name to commit to
    #[arg(short = 'r', long)]
    ref_name: Option<String>,

    /// commit to the ref of this layer digest instead
    #[arg(long)]
    layer: Option<String>,
}

impl CommitTarget {
    fn ref_name(self) -> String {
        match (self.ref_name, self.layer) {
            (Some(ref_name), _) => ref_name,
            (None, Some(digest)) => layer_ref(&digest),
            (None, None) => unreachable!("clap requires --ref-name or --layer"),
        }
    }
}

#[derive(Args)]
struct MergeArgs {
    /// store the result under this image name instead
    #[arg(long)]
    dest_name: Option<String>,

    /// keep the scratch root when the import fails
    #[arg(long)]
    keep_scratch: bool,

    /// parent directory for scratch roots
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// selinux file_contexts used to label the merged tree
    #[arg(long)]
    file_contexts: Option<PathBuf>,

    /// program run on the merged root before it is committed
    #[arg(long)]
    postprocess: Option<String>,
}

impl MergeArgs {
    fn config(&self, repo: &Repo) -> ImportConfig {
        let mut config = ImportConfig::from_defaults(&repo.config().import);
        config.keep_scratch_on_failure |= self.keep_scratch;
        config.destination_image_name = self.dest_name.clone();
        if let Some(dir) = &self.scratch_dir {
            config.scratch_dir = Some(dir.clone());
        }
        config
    }

    fn labeler(&self, repo: &Repo) -> ocizub::Result<Box<dyn Labeler>> {
        let path = self
            .file_contexts
            .as_ref()
            .or(repo.config().import.file_contexts.as_ref());
        let labeler: Box<dyn Labeler> = match path {
            Some(path) => Box::new(FileContexts::load(path)?),
            None => Box::new(NoLabels),
        };
        Ok(labeler)
    }

    fn postprocess(&self) -> Box<dyn Postprocess> {
        match &self.postprocess {
            Some(program) => Box::new(CommandPostprocess {
                program: program.clone(),
                args: Vec::new(),
            }),
            None => Box::new(NoPostprocess),
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run(cli: Cli) -> ocizub::Result<()> {
    match cli.command {
        Commands::Init { path } => {
            Repo::init(&path)?;
            println!("initialized ocizub repository at {}", path.display());
        }

        Commands::Commit {
            source,
            target,
            message,
            author,
        } => {
            let repo = Repo::open(&cli.repo)?;
            let ref_name = target.ref_name();
            let hash = commit(&repo, &source, &ref_name, message.as_deref(), author.as_deref())?;
            println!("{} {} ({} files)", hash, ref_name, count_files(&source));
        }

        Commands::Import {
            image,
            copy_program,
            copy_args,
            merge,
        } => {
            let repo = Repo::open(&cli.repo)?;
            let copier = CommandImageCopy {
                program: copy_program,
                args: copy_args,
            };
            let labeler = merge.labeler(&repo)?;
            let postprocess = merge.postprocess();
            let hooks = ImportHooks {
                postprocess: postprocess.as_ref(),
                labeler: labeler.as_ref(),
            };
            let outcome = import_image(&repo, &copier, &image, &merge.config(&repo), &hooks)?;
            print_outcome(&outcome);
        }

        Commands::Merge { image, merge } => {
            let repo = Repo::open(&cli.repo)?;
            let labeler = merge.labeler(&repo)?;
            let postprocess = merge.postprocess();
            let hooks = ImportHooks {
                postprocess: postprocess.as_ref(),
                labeler: labeler.as_ref(),
            };
            let outcome = merge_image(&repo, &image, &merge.config(&repo), &hooks)?;
            print_outcome(&outcome);
        }

        Commands::LayerRef { digest } => {
            println!("{}", layer_ref(&digest));
        }

        Commands::ImageRef { image } => {
            println!("{}", image_ref_for(&image));
        }

        Commands::Refs { pattern, images } => {
            let repo = Repo::open(&cli.repo)?;
            let refs = match (&pattern, images) {
                (_, true) => ocizub::list_refs_matching(&repo, &format!("{}*", IMAGE_REF_PREFIX))?,
                (Some(pattern), false) => ocizub::list_refs_matching(&repo, pattern)?,
                (None, false) => ocizub::list_refs(&repo)?,
            };

            for ref_name in refs {
                let hash = ocizub::read_ref(&repo, &ref_name)?;
                match image_name_from_ref(&ref_name).filter(|_| images) {
                    Some(name) => println!("{} {}", hash, name),
                    None => println!("{} {}", hash, ref_name),
                }
            }
        }

        Commands::ShowRef { ref_name } => {
            let repo = Repo::open(&cli.repo)?;
            let hash = ocizub::resolve_ref(&repo, &ref_name)?;
            println!("{}", hash);
        }

        Commands::ShowMetadata { rev, manifest } => {
            let repo = Repo::open(&cli.repo)?;
            let hash = ocizub::resolve_ref(&repo, &rev)?;
            let metadata = commit_metadata(&repo, &hash)?;
            if manifest {
                println!("{}", metadata.manifest);
            } else {
                let commit = ocizub::read_commit(&repo, &hash)?;
                println!("commit {}", hash);
                println!("source {}", metadata.source_title);
                for parent in &commit.parents {
                    println!("parent {}", parent);
                }
                println!("timestamp {}", commit.timestamp);
                println!();
                println!("{}", metadata.manifest);
            }
        }

        Commands::Checkout {
            ref_name,
            destination,
            copy,
        } => {
            let repo = Repo::open(&cli.repo)?;
            let mut options = LayerCheckoutOptions::from_config(repo.config());
            if copy {
                options.mode = CheckoutMode::Copy;
            }
            checkout(&repo, &ref_name, &destination, &options)?;
            println!("checked out {} to {}", ref_name, destination.display());
        }
    }

    Ok(())
}

fn print_outcome(outcome: &ImportOutcome) {
    println!("source {}", outcome.source);
    println!("ref {}", outcome.ref_name);
    println!("commit {}", outcome.commit);
    println!("layers {}", outcome.layers.len());
}
