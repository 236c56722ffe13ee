use clap::{Parser, Subcommand};
use std::path::PathBuf;
use anyhow::Result;
use tracing::info;

use crate::core::{Engine, GenerateOptions};

#[derive(Parser)]
#[command(name = "tutorsmith")]
#[command(about = "Turn a codebase into a beginner-friendly, multi-chapter tutorial")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default tutorsmith.toml
    Init {
        /// Target directory (defaults to current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Generate a tutorial for a GitHub repository or a local directory
    Generate {
        /// GitHub repository URL, optionally with /tree/{ref}/{path}
        #[arg(long, conflicts_with = "dir", required_unless_present = "dir")]
        repo: Option<String>,

        /// Local directory to analyze
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Project name (defaults to the repository or directory name)
        #[arg(short, long)]
        name: Option<String>,

        /// GitHub token, needed for private repositories and higher rate limits
        #[arg(short, long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Output directory; the tutorial goes into {output}/{name}
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Include pattern, e.g. '*.py' (repeatable)
        #[arg(short, long)]
        include: Vec<String>,

        /// Exclude pattern, e.g. 'tests/*' (repeatable)
        #[arg(short, long)]
        exclude: Vec<String>,

        /// Maximum file size in bytes
        #[arg(short = 's', long)]
        max_size: Option<u64>,

        /// Language of the generated tutorial
        #[arg(long)]
        language: Option<String>,

        /// Ignore and don't update the response cache
        #[arg(long)]
        no_cache: bool,

        /// Maximum number of abstractions (and therefore chapters)
        #[arg(long)]
        max_abstractions: Option<usize>,

        /// Sub-directory to document separately, e.g. 'src/Saas.Admin' (repeatable)
        #[arg(short, long = "module")]
        modules: Vec<String>,
    },
}

impl Cli {
    pub async fn execute(self, engine: Engine) -> Result<()> {
        match self.command {
            Commands::Init { path } => {
                engine.init(path).await?;
                Ok(())
            }
            Commands::Generate {
                repo,
                dir,
                name,
                token,
                output,
                include,
                exclude,
                max_size,
                language,
                no_cache,
                max_abstractions,
                modules,
            } => {
                let dirs = engine
                    .generate(GenerateOptions {
                        repo,
                        dir,
                        name,
                        token,
                        output,
                        include,
                        exclude,
                        max_size,
                        language,
                        no_cache,
                        max_abstractions,
                        modules,
                    })
                    .await?;
                for dir in dirs {
                    info!("Tutorial written to {}", dir.display());
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_generate_requires_a_source() {
        assert!(Cli::try_parse_from(["tutorsmith", "generate"]).is_err());
        assert!(Cli::try_parse_from(["tutorsmith", "generate", "--repo", "r", "--dir", "d"]).is_err());

        let cli = Cli::try_parse_from([
            "tutorsmith", "generate", "--dir", "src", "-i", "*.rs", "-i", "*.toml", "--no-cache",
        ])
        .unwrap();
        match cli.command {
            Commands::Generate { dir, include, no_cache, .. } => {
                assert_eq!(dir, Some(PathBuf::from("src")));
                assert_eq!(include, vec!["*.rs", "*.toml"]);
                assert!(no_cache);
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn test_module_flag_is_repeatable() {
        let cli = Cli::try_parse_from([
            "tutorsmith", "generate", "--repo", "https://github.com/acme/widgets",
            "--module", "src/Saas.Admin", "-m", "src/Saas.Lib",
        ])
        .unwrap();
        match cli.command {
            Commands::Generate { modules, .. } => assert_eq!(modules, vec!["src/Saas.Admin", "src/Saas.Lib"]),
            _ => panic!("expected generate"),
        }
    }
}
