//! Outgoing UDP requests

use crate::protocol::messages::encode_value;

/// Commands that can be sent without a session
const SESSIONLESS: &[&str] = &["AUTH", "PING", "ENCRYPT", "ENCODING", "VERSION"];

/// A single UDP request: command name plus ordered parameters
///
/// The session (`s=`) and correlation tag (`tag=`) are appended at encode
/// time by the client, never by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpRequest {
    name: String,
    params: Vec<(String, String)>,
    requires_auth: bool,
}

impl UdpRequest {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into().to_ascii_uppercase();
        let requires_auth = !SESSIONLESS.contains(&name.as_str());
        Self {
            name,
            params: Vec::new(),
            requires_auth,
        }
    }

    /// Append a parameter; order is preserved on the wire
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    /// Append a parameter only when a value is present
    pub fn param_opt(self, key: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.param(key, value),
            None => self,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    /// `PING`, asking for the outside port when behind NAT
    pub fn ping(nat: bool) -> Self {
        Self::new("PING").param_opt("nat", nat.then_some(1))
    }

    /// `LOGOUT`
    pub fn logout() -> Self {
        Self::new("LOGOUT")
    }

    /// `FILE` by size and ED2K hash
    pub fn file(size: u64, ed2k: &str) -> Self {
        Self::new("FILE")
            .param("size", size)
            .param("ed2k", ed2k)
            .param("fmask", "7FF8FEF8")
            .param("amask", "C0F0F0C0")
    }

    /// `GROUP` by id
    pub fn group(group_id: u32) -> Self {
        Self::new("GROUP").param("gid", group_id)
    }

    /// `MYLISTADD` by size and ED2K hash
    pub fn mylist_add(size: u64, ed2k: &str, watched: bool) -> Self {
        Self::new("MYLISTADD")
            .param("size", size)
            .param("ed2k", ed2k)
            .param("state", 1)
            .param("viewed", u8::from(watched))
    }

    /// `MYLISTADD ... edit=1`, updating an existing entry
    pub fn mylist_edit(size: u64, ed2k: &str, watched: bool) -> Self {
        Self::mylist_add(size, ed2k, watched).param("edit", 1)
    }

    /// `MYLISTDEL` by size and ED2K hash
    pub fn mylist_del(size: u64, ed2k: &str) -> Self {
        Self::new("MYLISTDEL").param("size", size).param("ed2k", ed2k)
    }

    /// `VOTE` for an anime; `value` is 100..=1000, or -1 to revoke
    pub fn vote_anime(anime_id: u32, value: i32) -> Self {
        Self::new("VOTE")
            .param("type", 1)
            .param("id", anime_id)
            .param("value", value)
    }

    /// Encode for the wire, appending the session and tag
    pub fn encode(&self, session: Option<&str>, tag: &str) -> String {
        let mut parts: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{k}={}", encode_value(v)))
            .collect();

        if let Some(session) = session.filter(|_| self.requires_auth) {
            parts.push(format!("s={session}"));
        }
        parts.push(format!("tag={tag}"));

        format!("{} {}", self.name, parts.join("&"))
    }

    /// Encode with credentials replaced by `***`
    pub fn masked(&self, session: Option<&str>, tag: &str) -> String {
        let encoded = self.encode(session, tag);
        match encoded.split_once(' ') {
            Some((name, params)) => {
                let params = params
                    .split('&')
                    .map(|part| match part.split_once('=') {
                        Some((key @ ("user" | "pass" | "s"), _)) => format!("{key}=***"),
                        _ => part.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("&");
                format!("{name} {params}")
            }
            None => encoded,
        }
    }
}
