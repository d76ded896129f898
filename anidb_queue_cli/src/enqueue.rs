//! `anidb-queue enqueue` arguments and their mapping to command kinds

use anidb_queue_core::CommandKind;
use clap::{Args, Subcommand};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("not a 32 character hex ED2K hash: {0}")]
    InvalidEd2k(String),

    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("vote must be between 100 and 1000, got {0}")]
    InvalidVote(i32),
}

#[derive(Args, Debug)]
pub struct EnqueueArgs {
    /// Override the default priority of the command kind (smaller runs first)
    #[arg(short, long, global = true)]
    pub priority: Option<i32>,

    #[command(subcommand)]
    pub command: EnqueueCommand,
}

/// Size and ED2K hash identifying a file
#[derive(Args, Debug, Clone)]
pub struct FileId {
    /// File size in bytes
    pub size: u64,

    /// ED2K hash
    #[arg(value_parser = parse_ed2k)]
    pub ed2k: String,
}

#[derive(Subcommand, Debug)]
pub enum EnqueueCommand {
    /// Fetch anime metadata over HTTP
    Anime {
        anime_id: u32,

        /// Fetch even if the cached record is fresh
        #[arg(long)]
        force: bool,
    },

    /// Look up a file by size and ED2K hash
    File(FileId),

    /// Hash a local file, then look it up
    Hash { path: PathBuf },

    /// Add a file to MyList
    MylistAdd {
        #[command(flatten)]
        file: FileId,

        #[arg(long)]
        watched: bool,
    },

    /// Update the watched state of a MyList entry
    MylistUpdate {
        #[command(flatten)]
        file: FileId,

        /// Mark watched; omit to mark unwatched
        #[arg(long)]
        watched: bool,
    },

    /// Remove a file from MyList
    MylistDelete(FileId),

    /// Fetch a release group
    Group { group_id: u32 },

    /// Vote on an anime (100-1000)
    Vote {
        anime_id: u32,
        #[arg(allow_negative_numbers = true)]
        value: i32,
    },

    /// Download an image
    Image { url: String },
}

impl EnqueueCommand {
    pub fn into_kind(self) -> Result<CommandKind, EnqueueError> {
        Ok(match self {
            Self::Anime { anime_id, force } => CommandKind::GetAnimeHttp {
                anime_id,
                force_refresh: force,
            },
            Self::File(FileId { size, ed2k }) => CommandKind::GetFile { size, ed2k },
            Self::Hash { path } => {
                if !path.is_file() {
                    return Err(EnqueueError::NotAFile(path));
                }
                // Identity is path based, so store one spelling per file
                let path = std::fs::canonicalize(&path).unwrap_or(path);
                CommandKind::HashFile { path }
            }
            Self::MylistAdd { file, watched } => CommandKind::AddFileToMyList {
                size: file.size,
                ed2k: file.ed2k,
                watched,
            },
            Self::MylistUpdate { file, watched } => CommandKind::UpdateMyListFileStatus {
                size: file.size,
                ed2k: file.ed2k,
                watched,
            },
            Self::MylistDelete(FileId { size, ed2k }) => {
                CommandKind::DeleteFileFromMyList { size, ed2k }
            }
            Self::Group { group_id } => CommandKind::GetReleaseGroup { group_id },
            Self::Vote { anime_id, value } => {
                if !(100..=1000).contains(&value) {
                    return Err(EnqueueError::InvalidVote(value));
                }
                CommandKind::VoteAnime { anime_id, value }
            }
            Self::Image { url } => CommandKind::DownloadImage { url },
        })
    }
}

fn parse_ed2k(value: &str) -> Result<String, EnqueueError> {
    if value.len() == 32 && value.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(value.to_ascii_lowercase())
    } else {
        Err(EnqueueError::InvalidEd2k(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: EnqueueArgs,
    }

    fn parse(args: &[&str]) -> EnqueueArgs {
        let argv = std::iter::once("enqueue").chain(args.iter().copied());
        Harness::try_parse_from(argv).unwrap().args
    }

    #[test]
    fn test_ed2k_is_normalized() {
        assert_eq!(
            parse_ed2k("A448017AAF21D8525FC10AE87AA6729D").unwrap(),
            "a448017aaf21d8525fc10ae87aa6729d"
        );
        assert!(parse_ed2k("xyz").is_err());
    }

    #[test]
    fn test_mylist_update_maps_watched_flag() {
        let args = parse(&[
            "mylist-update",
            "1000",
            "a448017aaf21d8525fc10ae87aa6729d",
            "--watched",
        ]);
        assert_eq!(
            args.command.into_kind().unwrap(),
            CommandKind::UpdateMyListFileStatus {
                size: 1000,
                ed2k: "a448017aaf21d8525fc10ae87aa6729d".to_string(),
                watched: true,
            }
        );
    }

    #[test]
    fn test_priority_flag_after_subcommand() {
        let args = parse(&["group", "7091", "--priority", "1"]);
        assert_eq!(args.priority, Some(1));
        assert_eq!(
            args.command.into_kind().unwrap(),
            CommandKind::GetReleaseGroup { group_id: 7091 }
        );
    }

    #[test]
    fn test_vote_range() {
        let args = parse(&["vote", "1", "5000"]);
        assert_eq!(
            args.command.into_kind().unwrap_err(),
            EnqueueError::InvalidVote(5000)
        );
    }

    #[test]
    fn test_hash_requires_existing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("missing.mkv");
        let args = parse(&["hash", missing.to_str().unwrap()]);
        assert!(matches!(
            args.command.into_kind(),
            Err(EnqueueError::NotAFile(_))
        ));

        let file = dir.path().join("ep01.mkv");
        std::fs::write(&file, b"data").unwrap();
        let args = parse(&["hash", file.to_str().unwrap()]);
        let CommandKind::HashFile { path } = args.command.into_kind().unwrap() else {
            panic!("expected a hash command");
        };
        assert!(path.is_absolute());
        assert!(path.ends_with("ep01.mkv"));
    }
}
