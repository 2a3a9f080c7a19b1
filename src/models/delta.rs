//! Update deltas for propagating entity changes to subscribers.
//!
//! Two representations of an entity exist side by side:
//! - the typed struct, used everywhere inside the store
//! - a [`FieldMap`] (key → JSON value), used where an entity crosses a
//!   boundary that does not know the schema, such as a generic update feed
//!
//! A [`Delta`] is either a full snapshot (`Upsert`), a partial patch of
//! changed fields (`Patch`), or a deletion (`Tombstone`). On the wire a
//! snapshot carries `"full": true` and a tombstone carries `"remove": true`;
//! anything else is a patch.

use crate::codec::{self, CodecError, short_type_name};
use crate::models::{
    Cmd, HistoryItem, Line, RemoteInstance, RemoteTarget, Screen, ScreenWindow, Session, Window,
};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Untyped key → value view of an entity.
pub type FieldMap = serde_json::Map<String, Value>;

const FULL_MARKER: &str = "full";
const REMOVE_MARKER: &str = "remove";

/// Conversion between an entity and its [`FieldMap`].
///
/// `from_map` leaves absent fields at their zero value and returns `None`
/// for an empty map.
pub trait DeltaMap: Sized + Default {
    fn to_map(&self) -> FieldMap;
    fn from_map(map: &FieldMap) -> Option<Self>;

    /// Strict decode of a non-empty map, used when folding patches.
    fn decode_map(map: &FieldMap) -> Result<Self, CodecError> {
        Ok(Self::from_map(map).unwrap_or_default())
    }
}

/// An entity that can travel inside a [`Delta`].
pub trait Keyed: DeltaMap + Serialize + DeserializeOwned {
    /// Field names that identify one row.
    const KEY_FIELDS: &'static [&'static str];
}

macro_rules! serde_delta_map {
    ($($ty:ty => [$($key:literal),+]),+ $(,)?) => {
        $(
            impl DeltaMap for $ty {
                fn to_map(&self) -> FieldMap {
                    match serde_json::to_value(self) {
                        Ok(Value::Object(map)) => map,
                        _ => FieldMap::new(),
                    }
                }

                fn from_map(map: &FieldMap) -> Option<Self> {
                    if map.is_empty() {
                        return None;
                    }
                    Self::decode_map(map).ok()
                }

                fn decode_map(map: &FieldMap) -> Result<Self, CodecError> {
                    serde_json::from_value(Value::Object(map.clone())).map_err(|source| {
                        CodecError::Json {
                            type_name: short_type_name::<Self>(),
                            source,
                        }
                    })
                }
            }

            impl Keyed for $ty {
                const KEY_FIELDS: &'static [&'static str] = &[$($key),+];
            }
        )+
    };
}

serde_delta_map!(
    Session => ["sessionid"],
    Screen => ["sessionid", "screenid"],
    ScreenWindow => ["sessionid", "screenid", "windowid"],
    Window => ["sessionid", "windowid"],
    RemoteInstance => ["riid"],
    Line => ["sessionid", "windowid", "lineid"],
    HistoryItem => ["historyid"],
);

fn set_str(target: &mut String, map: &FieldMap, key: &str) {
    if let Some(Value::String(s)) = map.get(key) {
        *target = s.clone();
    }
}

fn set_bool(target: &mut bool, map: &FieldMap, key: &str) {
    if let Some(Value::Bool(b)) = map.get(key) {
        *target = *b;
    }
}

fn set_i64(target: &mut i64, map: &FieldMap, key: &str) {
    if let Some(Value::Number(n)) = map.get(key) {
        if let Some(i) = n.as_i64() {
            *target = i;
        } else if let Some(f) = n.as_f64() {
            *target = f as i64;
        }
    }
}

/// Structured sub-fields travel as JSON text; malformed text leaves the zero value.
fn set_json<T: DeserializeOwned + Default>(target: &mut T, map: &FieldMap, key: &str) {
    match map.get(key) {
        Some(Value::String(text)) => {
            if let Ok(v) = codec::decode(Some(text)) {
                *target = v;
            }
        }
        Some(Value::Null) | None => {}
        Some(other) => {
            if let Ok(v) = serde_json::from_value(other.clone()) {
                *target = v;
            }
        }
    }
}

fn json_text<T: Serialize>(value: &T) -> Value {
    Value::String(codec::encode(value).unwrap_or_default())
}

/// Optional payloads: `None` travels as JSON null, `Some` as its text.
fn opt_json_text<T: Serialize>(value: &Option<T>) -> Value {
    match value {
        Some(inner) => json_text(inner),
        None => Value::Null,
    }
}

/// Counterpart of [`opt_json_text`]; the text `"null"` is a present value.
fn set_opt_json<T: DeserializeOwned>(target: &mut Option<T>, map: &FieldMap, key: &str) {
    match map.get(key) {
        Some(Value::String(text)) => {
            if let Ok(v) = serde_json::from_str(text) {
                *target = Some(v);
            }
        }
        Some(Value::Null) | None => {}
        Some(other) => {
            if let Ok(v) = serde_json::from_value(other.clone()) {
                *target = Some(v);
            }
        }
    }
}

impl DeltaMap for RemoteTarget {
    fn to_map(&self) -> FieldMap {
        let mut m = FieldMap::new();
        m.insert("remoteid".into(), self.remote_id.clone().into());
        m.insert("physicalid".into(), self.physical_id.clone().into());
        m.insert("remotetype".into(), self.remote_type.clone().into());
        m.insert("remotealias".into(), self.remote_alias.clone().into());
        m.insert(
            "remotecanonicalname".into(),
            self.remote_canonical_name.clone().into(),
        );
        m.insert("remotesudo".into(), self.remote_sudo.into());
        m.insert("remoteuser".into(), self.remote_user.clone().into());
        m.insert("remotehost".into(), self.remote_host.clone().into());
        m.insert("autoconnect".into(), self.auto_connect.into());
        m.insert("initpk".into(), opt_json_text(&self.init_pk));
        m.insert("sshopts".into(), opt_json_text(&self.ssh_opts));
        m.insert("lastconnectts".into(), self.last_connect_ts.into());
        m
    }

    fn from_map(m: &FieldMap) -> Option<Self> {
        if m.is_empty() {
            return None;
        }
        let mut r = RemoteTarget::default();
        set_str(&mut r.remote_id, m, "remoteid");
        set_str(&mut r.physical_id, m, "physicalid");
        set_str(&mut r.remote_type, m, "remotetype");
        set_str(&mut r.remote_alias, m, "remotealias");
        set_str(&mut r.remote_canonical_name, m, "remotecanonicalname");
        set_bool(&mut r.remote_sudo, m, "remotesudo");
        set_str(&mut r.remote_user, m, "remoteuser");
        set_str(&mut r.remote_host, m, "remotehost");
        set_bool(&mut r.auto_connect, m, "autoconnect");
        set_opt_json(&mut r.init_pk, m, "initpk");
        set_opt_json(&mut r.ssh_opts, m, "sshopts");
        set_i64(&mut r.last_connect_ts, m, "lastconnectts");
        Some(r)
    }
}

impl Keyed for RemoteTarget {
    const KEY_FIELDS: &'static [&'static str] = &["remoteid"];
}

impl DeltaMap for Cmd {
    fn to_map(&self) -> FieldMap {
        let mut m = FieldMap::new();
        m.insert("sessionid".into(), self.session_id.clone().into());
        m.insert("cmdid".into(), self.cmd_id.clone().into());
        m.insert("remoteid".into(), self.remote_id.clone().into());
        m.insert("cmdstr".into(), self.cmd_str.clone().into());
        m.insert("remotestate".into(), json_text(&self.remote_state));
        m.insert("termopts".into(), json_text(&self.term_opts));
        m.insert("status".into(), self.status.as_str().into());
        m.insert("startpk".into(), opt_json_text(&self.start_pk));
        m.insert("donepk".into(), opt_json_text(&self.done_pk));
        m.insert("runout".into(), json_text(&self.run_out));
        m.insert("usedrows".into(), self.used_rows.into());
        m
    }

    fn from_map(m: &FieldMap) -> Option<Self> {
        if m.is_empty() {
            return None;
        }
        let mut cmd = Cmd::default();
        set_str(&mut cmd.session_id, m, "sessionid");
        set_str(&mut cmd.cmd_id, m, "cmdid");
        set_str(&mut cmd.remote_id, m, "remoteid");
        set_str(&mut cmd.cmd_str, m, "cmdstr");
        set_json(&mut cmd.remote_state, m, "remotestate");
        set_json(&mut cmd.term_opts, m, "termopts");
        if let Some(Value::String(s)) = m.get("status") {
            if let Ok(status) = s.parse() {
                cmd.status = status;
            }
        }
        set_opt_json(&mut cmd.start_pk, m, "startpk");
        set_opt_json(&mut cmd.done_pk, m, "donepk");
        set_json(&mut cmd.run_out, m, "runout");
        set_i64(&mut cmd.used_rows, m, "usedrows");
        Some(cmd)
    }
}

impl Keyed for Cmd {
    const KEY_FIELDS: &'static [&'static str] = &["sessionid", "cmdid"];
}

fn key_fields<T: Keyed>(map: &FieldMap) -> FieldMap {
    T::KEY_FIELDS
        .iter()
        .filter_map(|k| map.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect()
}

/// An incremental change to one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta<T> {
    /// Complete replacement snapshot
    Upsert(T),
    /// Key fields plus the fields that changed
    Patch(FieldMap),
    /// Key fields of a deleted entity
    Tombstone(FieldMap),
}

impl<T: Keyed> Delta<T> {
    pub fn upsert(entity: T) -> Self {
        Delta::Upsert(entity)
    }

    /// Patch carrying the key and the named fields of `entity`.
    pub fn patch(entity: &T, fields: &[&str]) -> Self {
        let map = entity.to_map();
        let mut patch = key_fields::<T>(&map);
        for field in fields {
            if let Some(v) = map.get(*field) {
                patch.insert(field.to_string(), v.clone());
            }
        }
        Delta::Patch(patch)
    }

    pub fn tombstone(entity: &T) -> Self {
        Delta::Tombstone(key_fields::<T>(&entity.to_map()))
    }

    /// Key fields identifying the affected entity.
    pub fn key(&self) -> FieldMap {
        match self {
            Delta::Upsert(entity) => key_fields::<T>(&entity.to_map()),
            Delta::Patch(map) | Delta::Tombstone(map) => key_fields::<T>(map),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Delta::Tombstone(_))
    }

    /// Fold this delta into the subscriber's current copy.
    ///
    /// A patch without a current copy yields an entity holding only the
    /// patched fields. Only a tombstone yields `None`; a patch whose values
    /// do not decode is an error and leaves the caller's copy untouched.
    pub fn apply(self, current: Option<T>) -> Result<Option<T>, CodecError> {
        match self {
            Delta::Upsert(entity) => Ok(Some(entity)),
            Delta::Tombstone(_) => Ok(None),
            Delta::Patch(patch) if patch.is_empty() => Ok(current),
            Delta::Patch(patch) => {
                let mut base = current.map(|c| c.to_map()).unwrap_or_default();
                for (k, v) in patch {
                    base.insert(k, v);
                }
                T::decode_map(&base).map(Some)
            }
        }
    }

    /// Wire form with `full` / `remove` markers.
    pub fn to_wire(&self) -> Value {
        match self {
            Delta::Upsert(entity) => {
                let mut map = match serde_json::to_value(entity) {
                    Ok(Value::Object(map)) => map,
                    _ => FieldMap::new(),
                };
                map.insert(FULL_MARKER.to_string(), Value::Bool(true));
                Value::Object(map)
            }
            Delta::Patch(map) => Value::Object(map.clone()),
            Delta::Tombstone(key) => {
                let mut map = key.clone();
                map.insert(REMOVE_MARKER.to_string(), Value::Bool(true));
                Value::Object(map)
            }
        }
    }

    pub fn from_wire(value: Value) -> Result<Self, serde_json::Error> {
        let Value::Object(mut map) = value else {
            return Err(de::Error::custom("delta must be a JSON object"));
        };
        let remove = matches!(map.remove(REMOVE_MARKER), Some(Value::Bool(true)));
        let full = matches!(map.remove(FULL_MARKER), Some(Value::Bool(true)));
        if remove {
            Ok(Delta::Tombstone(key_fields::<T>(&map)))
        } else if full {
            Ok(Delta::Upsert(serde_json::from_value(Value::Object(map))?))
        } else {
            Ok(Delta::Patch(map))
        }
    }
}

impl<T: Keyed> Serialize for Delta<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de, T: Keyed> Deserialize<'de> for Delta<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Delta::from_wire(value).map_err(de::Error::custom)
    }
}

/// A batch of deltas delivered to subscribers together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdatePacket {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<Delta<Session>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub screens: Vec<Delta<Screen>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub screen_windows: Vec<Delta<ScreenWindow>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub windows: Vec<Delta<Window>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remote_instances: Vec<Delta<RemoteInstance>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<Delta<RemoteTarget>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<Delta<Line>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cmds: Vec<Delta<Cmd>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<Delta<HistoryItem>>,
}

impl UpdatePacket {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
            + self.screens.len()
            + self.screen_windows.len()
            + self.windows.len()
            + self.remote_instances.len()
            + self.remotes.len()
            + self.lines.len()
            + self.cmds.len()
            + self.history.len()
    }

    pub fn extend(&mut self, other: UpdatePacket) {
        self.sessions.extend(other.sessions);
        self.screens.extend(other.screens);
        self.screen_windows.extend(other.screen_windows);
        self.windows.extend(other.windows);
        self.remote_instances.extend(other.remote_instances);
        self.remotes.extend(other.remotes);
        self.lines.extend(other.lines);
        self.cmds.extend(other.cmds);
        self.history.extend(other.history);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CmdStatus, Packet, RemoteState, ShareMode, SshOpts, TermOpts};
    use serde_json::json;

    fn sample_remote() -> RemoteTarget {
        RemoteTarget {
            remote_id: "r-1".to_string(),
            physical_id: "phys-1".to_string(),
            remote_type: "ssh".to_string(),
            remote_alias: "work".to_string(),
            remote_canonical_name: "mike@devbox".to_string(),
            remote_sudo: true,
            remote_user: "mike".to_string(),
            remote_host: "devbox".to_string(),
            auto_connect: true,
            init_pk: Some(Packet::new(json!({"type": "init", "version": "0.1.0"}))),
            ssh_opts: Some(SshOpts {
                ssh_host: "devbox".to_string(),
                ssh_opts_str: "-p 2222".to_string(),
                ssh_identity: "~/.ssh/id_ed25519".to_string(),
                ssh_user: "mike".to_string(),
            }),
            last_connect_ts: 1_700_000_000_123,
        }
    }

    #[test]
    fn test_remote_map_round_trip() {
        let remote = sample_remote();
        let back = RemoteTarget::from_map(&remote.to_map()).unwrap();
        assert_eq!(back, remote);
    }

    #[test]
    fn test_remote_map_round_trip_without_payloads() {
        let remote = RemoteTarget {
            init_pk: None,
            ssh_opts: None,
            ..sample_remote()
        };
        let map = remote.to_map();
        assert_eq!(map["initpk"], Value::Null);
        assert_eq!(RemoteTarget::from_map(&map).unwrap(), remote);
    }

    #[test]
    fn test_null_payload_survives_map_round_trip() {
        let remote = RemoteTarget {
            init_pk: Some(Packet::new(Value::Null)),
            ..sample_remote()
        };
        let map = remote.to_map();
        assert_eq!(map["initpk"], json!("null"));
        let back = RemoteTarget::from_map(&map).unwrap();
        assert_eq!(back.init_pk, Some(Packet::new(Value::Null)));
        assert_eq!(back, remote);

        let cmd = Cmd {
            cmd_id: "c1".to_string(),
            start_pk: Some(Packet::new(Value::Null)),
            ..Default::default()
        };
        let back = Cmd::from_map(&cmd.to_map()).unwrap();
        assert_eq!(back.start_pk, Some(Packet::new(Value::Null)));
        assert!(back.done_pk.is_none());
    }

    #[test]
    fn test_map_keys_use_flat_wire_names() {
        let map = sample_remote().to_map();
        assert_eq!(map["remoteid"], json!("r-1"));
        assert_eq!(map["remotecanonicalname"], json!("mike@devbox"));
        assert!(map.get("remote_id").is_none());

        let session = Session {
            session_id: "s1".to_string(),
            active_screen_id: "sc1".to_string(),
            ..Default::default()
        };
        let map = session.to_map();
        assert_eq!(map["sessionid"], json!("s1"));
        assert_eq!(map["activescreenid"], json!("sc1"));
        assert_eq!(map["sharemode"], json!("local"));
    }

    #[test]
    fn test_from_empty_map_is_none() {
        assert!(RemoteTarget::from_map(&FieldMap::new()).is_none());
        assert!(Cmd::from_map(&FieldMap::new()).is_none());
        assert!(Session::from_map(&FieldMap::new()).is_none());
    }

    #[test]
    fn test_absent_fields_stay_zero() {
        let mut map = FieldMap::new();
        map.insert("remoteid".into(), json!("r-9"));
        map.insert("remotesudo".into(), json!("not a bool"));
        let remote = RemoteTarget::from_map(&map).unwrap();
        assert_eq!(remote.remote_id, "r-9");
        assert!(!remote.remote_sudo);
        assert!(remote.init_pk.is_none());
        assert_eq!(remote.last_connect_ts, 0);
    }

    #[test]
    fn test_cmd_map_round_trip() {
        let cmd = Cmd {
            session_id: "s1".to_string(),
            cmd_id: "c1".to_string(),
            remote_id: "r1".to_string(),
            cmd_str: "ls -l".to_string(),
            remote_state: RemoteState {
                cwd: "/home/mike".to_string(),
            },
            term_opts: TermOpts {
                rows: 24,
                cols: 80,
                flex_rows: true,
                cmd_size: 0,
            },
            status: CmdStatus::Done,
            start_pk: Some(Packet::new(json!({"type": "cmdstart", "pid": 42}))),
            done_pk: Some(Packet::new(json!({"type": "cmddone", "exitcode": 0}))),
            used_rows: 7,
            run_out: vec![Packet::new(json!({"type": "data", "data64": "aGk="}))],
        };
        assert_eq!(Cmd::from_map(&cmd.to_map()).unwrap(), cmd);
    }

    #[test]
    fn test_upsert_wire_has_full_marker() {
        let session = Session {
            session_id: "s1".to_string(),
            name: "default".to_string(),
            share_mode: ShareMode::Local,
            ..Default::default()
        };
        let wire = Delta::upsert(session.clone()).to_wire();
        assert_eq!(wire["full"], json!(true));
        assert!(wire.get("remove").is_none());

        let back: Delta<Session> = Delta::from_wire(wire).unwrap();
        assert_eq!(back, Delta::Upsert(session));
    }

    #[test]
    fn test_tombstone_wire_carries_only_key() {
        let screen = Screen {
            session_id: "s1".to_string(),
            screen_id: "sc1".to_string(),
            name: "s1".to_string(),
            ..Default::default()
        };
        let wire = Delta::tombstone(&screen).to_wire();
        assert_eq!(
            wire,
            json!({"sessionid": "s1", "screenid": "sc1", "remove": true})
        );
        let back: Delta<Screen> = Delta::from_wire(wire).unwrap();
        assert!(back.is_tombstone());
        assert_eq!(back.apply(Some(screen)).unwrap(), None);
    }

    #[test]
    fn test_patch_applies_only_named_fields() {
        let mut remote = sample_remote();
        let current = remote.clone();
        remote.last_connect_ts = 42;
        remote.remote_host = "ignored-host".to_string();

        let patch = Delta::patch(&remote, &["lastconnectts"]);
        let wire = patch.to_wire();
        assert_eq!(wire, json!({"remoteid": "r-1", "lastconnectts": 42}));

        let applied = Delta::<RemoteTarget>::from_wire(wire)
            .unwrap()
            .apply(Some(current))
            .unwrap()
            .unwrap();
        assert_eq!(applied.last_connect_ts, 42);
        assert_eq!(applied.remote_host, "devbox");
    }

    #[test]
    fn test_patch_without_current_yields_partial_entity() {
        let line = Line {
            session_id: "s1".to_string(),
            window_id: "w1".to_string(),
            line_id: "l1".to_string(),
            text: "hello".to_string(),
            ts: 99,
            ..Default::default()
        };
        let partial = Delta::patch(&line, &["text"])
            .apply(None)
            .unwrap()
            .unwrap();
        assert_eq!(partial.line_id, "l1");
        assert_eq!(partial.text, "hello");
        assert_eq!(partial.ts, 0);
    }

    #[test]
    fn test_update_packet_serializes_non_empty_lists() {
        let mut packet = UpdatePacket::default();
        assert!(packet.is_empty());
        packet.lines.push(Delta::upsert(Line {
            line_id: "l1".to_string(),
            ..Default::default()
        }));
        let json = serde_json::to_value(&packet).unwrap();
        assert!(json.get("sessions").is_none());
        assert_eq!(json["lines"][0]["full"], json!(true));

        let back: UpdatePacket = serde_json::from_value(json).unwrap();
        assert_eq!(back, packet);
        assert_eq!(back.len(), 1);
    }

    #[test]
    fn test_delta_key() {
        let cmd = Cmd {
            session_id: "s1".to_string(),
            cmd_id: "c1".to_string(),
            cmd_str: "make".to_string(),
            ..Default::default()
        };
        let key = Delta::upsert(cmd).key();
        assert_eq!(key.len(), 2);
        assert_eq!(key["cmdid"], json!("c1"));
    }

    #[test]
    fn test_undecodable_patch_is_an_error_not_a_removal() {
        let session = Session {
            session_id: "s1".to_string(),
            name: "default".to_string(),
            ..Default::default()
        };
        let mut map = FieldMap::new();
        map.insert("sessionid".into(), json!("s1"));
        map.insert("sharemode".into(), json!("broadcast"));

        let result = Delta::<Session>::Patch(map).apply(Some(session));
        assert!(matches!(
            result,
            Err(CodecError::Json { type_name: "Session", .. })
        ));
    }

    #[test]
    fn test_empty_patch_keeps_current() {
        let screen = Screen {
            screen_id: "sc1".to_string(),
            ..Default::default()
        };
        let kept = Delta::<Screen>::Patch(FieldMap::new())
            .apply(Some(screen.clone()))
            .unwrap();
        assert_eq!(kept, Some(screen));
        assert_eq!(Delta::<Screen>::Patch(FieldMap::new()).apply(None).unwrap(), None);
    }
}
