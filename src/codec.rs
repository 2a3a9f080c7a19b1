//! JSON text codec for structured column values.
//!
//! Options, layouts, remote state, terminal geometry and opaque protocol
//! payloads are each stored as a single TEXT column holding canonical JSON.
//! The column format is part of the on-disk contract:
//!
//! - NULL, empty text and the literal `null` decode to the type's default
//! - unknown JSON fields are ignored on decode
//! - the encoding of a default value decodes back to the same default

use rusqlite::types::{FromSqlError, FromSqlResult, ValueRef};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::type_name;

/// Malformed structured-field text.
///
/// A row carrying one of these is corrupt; callers do not retry.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed {type_name} value: {source}")]
    Json {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot encode {type_name} value: {source}")]
    Encode {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown {type_name} value: {value:?}")]
    UnknownVariant {
        type_name: &'static str,
        value: String,
    },

    #[error("{type_name} column is not valid UTF-8")]
    NotUtf8 { type_name: &'static str },
}

/// Encode a structured value as column text.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|source| CodecError::Encode {
        type_name: short_type_name::<T>(),
        source,
    })
}

/// Decode column text, treating absent or empty input as the zero value.
pub fn decode<T: DeserializeOwned + Default>(text: Option<&str>) -> Result<T, CodecError> {
    let text = match text.map(str::trim) {
        None | Some("") | Some("null") => return Ok(T::default()),
        Some(text) => text,
    };
    serde_json::from_str(text).map_err(|source| CodecError::Json {
        type_name: short_type_name::<T>(),
        source,
    })
}

/// Decode a raw SQLite value for a `FromSql` implementation.
pub fn decode_column<T: DeserializeOwned + Default>(value: ValueRef<'_>) -> FromSqlResult<T> {
    let text = match value {
        ValueRef::Null => None,
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Some(std::str::from_utf8(bytes).map_err(
            |_| {
                FromSqlError::Other(Box::new(CodecError::NotUtf8 {
                    type_name: short_type_name::<T>(),
                }))
            },
        )?),
        ValueRef::Integer(_) | ValueRef::Real(_) => return Err(FromSqlError::InvalidType),
    };
    decode(text).map_err(|e| FromSqlError::Other(Box::new(e)))
}

pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    if full.contains('<') {
        return full;
    }
    full.rsplit("::").next().unwrap_or(full)
}

/// Implement `ToSql`/`FromSql` for types stored as JSON text columns.
macro_rules! json_column {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl rusqlite::ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                    let text = $crate::codec::encode(self)
                        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                    Ok(rusqlite::types::ToSqlOutput::from(text))
                }
            }

            impl rusqlite::types::FromSql for $ty {
                fn column_result(
                    value: rusqlite::types::ValueRef<'_>,
                ) -> rusqlite::types::FromSqlResult<Self> {
                    $crate::codec::decode_column(value)
                }
            }
        )+
    };
}

pub(crate) use json_column;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Layout, Packet, RemoteState, ScreenOpts, TermOpts, WindowOpts};

    #[test]
    fn test_decode_empty_inputs_yield_default() {
        for input in [None, Some(""), Some("null"), Some("  ")] {
            let opts: TermOpts = decode(input).unwrap();
            assert_eq!(opts, TermOpts::default());
        }
    }

    #[test]
    fn test_zero_values_round_trip() {
        let text = encode(&ScreenOpts::default()).unwrap();
        assert_eq!(decode::<ScreenOpts>(Some(&text)).unwrap(), ScreenOpts::default());

        let text = encode(&Layout::default()).unwrap();
        assert_eq!(decode::<Layout>(Some(&text)).unwrap(), Layout::default());

        let text = encode(&RemoteState::default()).unwrap();
        assert_eq!(decode::<RemoteState>(Some(&text)).unwrap(), RemoteState::default());

        let text = encode(&WindowOpts::default()).unwrap();
        assert_eq!(decode::<WindowOpts>(Some(&text)).unwrap(), WindowOpts::default());

        let text = encode(&Vec::<Packet>::new()).unwrap();
        assert!(decode::<Vec<Packet>>(Some(&text)).unwrap().is_empty());
    }

    #[test]
    fn test_populated_values_round_trip() {
        let layout = Layout {
            layout_type: "float".to_string(),
            parent: "w1".to_string(),
            z_index: 3,
            float: true,
            top: "10%".to_string(),
            width: "50%".to_string(),
            ..Default::default()
        };
        let text = encode(&layout).unwrap();
        assert_eq!(decode::<Layout>(Some(&text)).unwrap(), layout);

        let term = TermOpts {
            rows: 25,
            cols: 80,
            flex_rows: true,
            cmd_size: 1024,
        };
        let text = encode(&term).unwrap();
        assert_eq!(decode::<TermOpts>(Some(&text)).unwrap(), term);
    }

    #[test]
    fn test_wire_field_names_are_stable() {
        let term = TermOpts {
            rows: 2,
            cols: 3,
            flex_rows: true,
            cmd_size: 4,
        };
        assert_eq!(
            encode(&term).unwrap(),
            r#"{"rows":2,"cols":3,"flexrows":true,"cmdsize":4}"#
        );
        assert_eq!(encode(&Layout::full()).unwrap(), r#"{"type":"full"}"#);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let state: RemoteState =
            decode(Some(r#"{"cwd":"/tmp","shell":"zsh","extra":{"a":1}}"#)).unwrap();
        assert_eq!(state.cwd, "/tmp");
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let term: TermOpts = decode(Some(r#"{"cols":132}"#)).unwrap();
        assert_eq!(term.cols, 132);
        assert_eq!(term.rows, 0);
        assert!(!term.flex_rows);
    }

    #[test]
    fn test_malformed_text_is_codec_error() {
        let err = decode::<ScreenOpts>(Some("{not json")).unwrap_err();
        assert!(matches!(err, CodecError::Json { type_name: "ScreenOpts", .. }));
        assert!(err.to_string().contains("ScreenOpts"));
    }

    #[test]
    fn test_decode_column_null_is_default() {
        let layout: Layout = decode_column(ValueRef::Null).unwrap();
        assert_eq!(layout, Layout::default());
    }

    #[test]
    fn test_decode_column_rejects_integers() {
        let result: FromSqlResult<Layout> = decode_column(ValueRef::Integer(7));
        assert!(matches!(result, Err(FromSqlError::InvalidType)));
    }
}
