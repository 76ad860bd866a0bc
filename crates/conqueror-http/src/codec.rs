//! Context data wire codec.
//!
//! Context data crosses an HTTP boundary in the `conqueror-context` header.
//! Each entry is written as `tag:key=value`, entries are joined by `,`:
//!
//! ```text
//! d:tenant=acme,d:locale=de-CH,b:session=42
//! ```
//!
//! | Tag | Store          |
//! |-----|----------------|
//! | `d` | downstream     |
//! | `u` | upstream       |
//! | `b` | bidirectional  |
//!
//! Keys and values are percent-encoded, so `,` `=` `:` `|` `%` and any
//! non-visible characters survive the round trip. Only string values with
//! [`Scope::AcrossTransports`] are written.

use conqueror_core::{ConquerorContext, ContextData, ContextDataFormatError, DataDirection, Scope};

/// Name of the header carrying context data in both directions.
pub const CONQUEROR_CONTEXT_HEADER: &str = "conqueror-context";

/// Name of the request header carrying the id of the message being sent.
pub const CONQUEROR_MESSAGE_ID_HEADER: &str = "conqueror-message-id";

const ENTRY_SEPARATOR: char = ',';
const TAG_SEPARATOR: char = ':';
const KEY_VALUE_SEPARATOR: char = '=';

const fn tag_of(direction: DataDirection) -> char {
    match direction {
        DataDirection::Downstream => 'd',
        DataDirection::Upstream => 'u',
        DataDirection::Bidirectional => 'b',
    }
}

fn direction_of(tag: &str) -> Option<DataDirection> {
    match tag {
        "d" => Some(DataDirection::Downstream),
        "u" => Some(DataDirection::Upstream),
        "b" => Some(DataDirection::Bidirectional),
        _ => None,
    }
}

fn encode_into(out: &mut String, direction: DataDirection, data: &ContextData) {
    for (key, value) in data.transferable() {
        if !out.is_empty() {
            out.push(ENTRY_SEPARATOR);
        }
        out.push(tag_of(direction));
        out.push(TAG_SEPARATOR);
        out.push_str(&urlencoding::encode(key));
        out.push(KEY_VALUE_SEPARATOR);
        out.push_str(&urlencoding::encode(value));
    }
}

fn encode(ctx: &ConquerorContext, direction: DataDirection) -> Option<String> {
    let mut out = String::new();
    encode_into(&mut out, direction, &ctx.data(direction));
    encode_into(
        &mut out,
        DataDirection::Bidirectional,
        &ctx.data(DataDirection::Bidirectional),
    );
    (!out.is_empty()).then_some(out)
}

/// Encodes the downstream and bidirectional data sent with a request.
///
/// Returns `None` if there is nothing to send.
#[must_use]
pub fn encode_downstream_context_data(ctx: &ConquerorContext) -> Option<String> {
    encode(ctx, DataDirection::Downstream)
}

/// Encodes the upstream and bidirectional data sent with a response.
///
/// Returns `None` if there is nothing to send.
#[must_use]
pub fn encode_upstream_context_data(ctx: &ConquerorContext) -> Option<String> {
    encode(ctx, DataDirection::Upstream)
}

type DecodedEntry = (DataDirection, String, String);

fn unescape(input: &str, part: &str) -> Result<String, ContextDataFormatError> {
    urlencoding::decode(part)
        .map(std::borrow::Cow::into_owned)
        .map_err(|_| ContextDataFormatError::new(input, "escaped text is not valid UTF-8"))
}

fn decode_entries(header: &str, entries: &mut Vec<DecodedEntry>) -> Result<(), ContextDataFormatError> {
    if header.trim().is_empty() {
        return Ok(());
    }

    for entry in header.split(ENTRY_SEPARATOR) {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(ContextDataFormatError::new(header, "empty entry"));
        }
        let (tag, rest) = entry
            .split_once(TAG_SEPARATOR)
            .ok_or_else(|| ContextDataFormatError::new(entry, "missing type tag"))?;
        let direction = direction_of(tag).ok_or_else(|| {
            ContextDataFormatError::new(entry, format!("unknown type tag '{tag}'"))
        })?;
        let (key, value) = rest
            .split_once(KEY_VALUE_SEPARATOR)
            .ok_or_else(|| ContextDataFormatError::new(entry, "missing '=' between key and value"))?;
        entries.push((direction, unescape(entry, key)?, unescape(entry, value)?));
    }
    Ok(())
}

/// Decodes header values into `ctx`.
///
/// Values are applied in order, so a later entry for the same key wins. An
/// empty value carries no data. Nothing is written unless every value
/// decodes.
///
/// # Errors
///
/// Returns [`ContextDataFormatError`] for an unknown tag, an entry without
/// `:` or `=`, or escaped text that is not valid UTF-8.
///
/// # Example
///
/// ```
/// use conqueror_core::{ConquerorContext, Scope};
/// use conqueror_http::codec::{decode_context_data, encode_downstream_context_data};
///
/// let client = ConquerorContext::new();
/// client
///     .downstream_context_data()
///     .set("a,b", "x=y", Scope::AcrossTransports);
/// client.downstream_context_data().set("local", "1", Scope::InProcess);
///
/// let header = encode_downstream_context_data(&client).unwrap();
/// assert_eq!(header, "d:a%2Cb=x%3Dy");
///
/// let server = ConquerorContext::new();
/// decode_context_data(&server, [header.as_str()]).unwrap();
/// assert_eq!(server.downstream_context_data().get_str("a,b"), Some("x=y"));
/// assert!(!server.downstream_context_data().contains_key("local"));
/// ```
pub fn decode_context_data<'a, I>(ctx: &ConquerorContext, values: I) -> Result<(), ContextDataFormatError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut entries = Vec::new();
    for value in values {
        decode_entries(value, &mut entries)?;
    }

    for (direction, key, value) in entries {
        ctx.data(direction).set(key, value, Scope::AcrossTransports);
    }
    Ok(())
}

/// Decodes every `conqueror-context` value in `headers` into `ctx`.
///
/// # Errors
///
/// A value that is not visible ASCII is rejected like any other malformed
/// entry, and nothing is written.
pub fn decode_context_headers(
    ctx: &ConquerorContext,
    headers: &http::HeaderMap,
) -> Result<(), ContextDataFormatError> {
    let values = headers
        .get_all(CONQUEROR_CONTEXT_HEADER)
        .iter()
        .map(|value| {
            value.to_str().map_err(|_| {
                ContextDataFormatError::new(
                    String::from_utf8_lossy(value.as_bytes()),
                    "header value is not visible ASCII",
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    decode_context_data(ctx, values)
}
