//! The closed catalogue of command kinds

use crate::commands::priority;
use crate::queue::QueueName;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Work kinds, persisted as a tagged JSON payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandKind {
    /// Full anime XML over HTTP
    GetAnimeHttp {
        anime_id: u32,
        #[serde(default)]
        force_refresh: bool,
    },
    /// UDP FILE lookup by size and ED2K
    GetFile { size: u64, ed2k: String },
    /// Hash a local file, then look it up
    HashFile { path: PathBuf },
    GetReleaseGroup { group_id: u32 },
    AddFileToMyList {
        size: u64,
        ed2k: String,
        #[serde(default)]
        watched: bool,
    },
    UpdateMyListFileStatus {
        size: u64,
        ed2k: String,
        watched: bool,
    },
    VoteAnime { anime_id: u32, value: i32 },
    DeleteFileFromMyList { size: u64, ed2k: String },
    DownloadImage { url: String },
}

impl CommandKind {
    /// Dedup key; two kinds describing the same work share it
    pub fn identity(&self) -> String {
        match self {
            Self::GetAnimeHttp { anime_id, .. } => format!("GetAnimeHTTP:{anime_id}"),
            Self::GetFile { ed2k, .. } => format!("GetFile:{ed2k}"),
            Self::HashFile { path } => format!("HashFile:{}", path.display()),
            Self::GetReleaseGroup { group_id } => format!("GetReleaseGroup:{group_id}"),
            Self::AddFileToMyList { ed2k, .. } => format!("AddFileToMyList:{ed2k}"),
            Self::UpdateMyListFileStatus { ed2k, .. } => {
                format!("UpdateMyListFileStatus:{ed2k}")
            }
            Self::VoteAnime { anime_id, .. } => format!("VoteAnime:{anime_id}"),
            Self::DeleteFileFromMyList { ed2k, .. } => format!("DeleteFileFromMyList:{ed2k}"),
            Self::DownloadImage { url } => format!("DownloadImage:{url}"),
        }
    }

    pub fn queue(&self) -> QueueName {
        match self {
            Self::HashFile { .. } => QueueName::Hasher,
            Self::DownloadImage { .. } => QueueName::Images,
            _ => QueueName::General,
        }
    }

    pub fn default_priority(&self) -> i32 {
        match self {
            Self::GetAnimeHttp { .. } => priority::ANIME_HTTP,
            Self::GetFile { .. } => priority::FILE_INFO,
            Self::HashFile { .. } => priority::HASH,
            Self::GetReleaseGroup { .. } => priority::RELEASE_GROUP,
            Self::AddFileToMyList { .. } | Self::UpdateMyListFileStatus { .. } => {
                priority::MYLIST
            }
            Self::VoteAnime { .. } => priority::VOTE,
            Self::DeleteFileFromMyList { .. } => priority::MYLIST_DELETE,
            Self::DownloadImage { .. } => priority::IMAGE,
        }
    }

    /// Human readable line for logs and status output
    pub fn description(&self) -> String {
        match self {
            Self::GetAnimeHttp { anime_id, .. } => format!("Getting anime {anime_id} over HTTP"),
            Self::GetFile { ed2k, .. } => format!("Getting file info for {ed2k}"),
            Self::HashFile { path } => format!("Hashing {}", path.display()),
            Self::GetReleaseGroup { group_id } => format!("Getting release group {group_id}"),
            Self::AddFileToMyList { ed2k, .. } => format!("Adding {ed2k} to MyList"),
            Self::UpdateMyListFileStatus { ed2k, watched, .. } => {
                let state = if *watched { "watched" } else { "unwatched" };
                format!("Marking {ed2k} {state} in MyList")
            }
            Self::VoteAnime { anime_id, value } => format!("Voting {value} on anime {anime_id}"),
            Self::DeleteFileFromMyList { ed2k, .. } => format!("Removing {ed2k} from MyList"),
            Self::DownloadImage { url } => format!("Downloading {url}"),
        }
    }

    /// Whether the command talks to AniDB at all
    pub fn uses_network(&self) -> bool {
        !matches!(self, Self::HashFile { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identities_and_routing() {
        let cases = [
            (
                CommandKind::GetAnimeHttp {
                    anime_id: 100,
                    force_refresh: true,
                },
                "GetAnimeHTTP:100",
                QueueName::General,
                2,
            ),
            (
                CommandKind::HashFile {
                    path: PathBuf::from("/anime/ep01.mkv"),
                },
                "HashFile:/anime/ep01.mkv",
                QueueName::Hasher,
                4,
            ),
            (
                CommandKind::DeleteFileFromMyList {
                    size: 1,
                    ed2k: "abc".to_string(),
                },
                "DeleteFileFromMyList:abc",
                QueueName::General,
                10,
            ),
            (
                CommandKind::DownloadImage {
                    url: "https://cdn.anidb.net/images/main/440.jpg".to_string(),
                },
                "DownloadImage:https://cdn.anidb.net/images/main/440.jpg",
                QueueName::Images,
                2,
            ),
        ];

        for (kind, identity, queue, priority) in cases {
            assert_eq!(kind.identity(), identity);
            assert_eq!(kind.queue(), queue);
            assert_eq!(kind.default_priority(), priority);
        }
    }

    #[test]
    fn test_force_refresh_does_not_change_identity() {
        let a = CommandKind::GetAnimeHttp {
            anime_id: 7,
            force_refresh: false,
        };
        let b = CommandKind::GetAnimeHttp {
            anime_id: 7,
            force_refresh: true,
        };
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_payload_json_shape() {
        let kind = CommandKind::AddFileToMyList {
            size: 734003200,
            ed2k: "a0b1".to_string(),
            watched: true,
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "add_file_to_my_list");
        assert_eq!(json["size"], 734003200);

        let parsed: CommandKind =
            serde_json::from_str(r#"{"type":"get_anime_http","anime_id":5}"#).unwrap();
        assert_eq!(
            parsed,
            CommandKind::GetAnimeHttp {
                anime_id: 5,
                force_refresh: false
            }
        );
    }
}
