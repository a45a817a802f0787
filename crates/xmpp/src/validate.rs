//! Request validation.
//!
//! Checks run in a fixed order and the first failure wins. A key counts as
//! present unless it is missing, `null`, `false`, `0`, or the empty string.

use jid::Jid;
use serde_json::Value;

use crate::error::ClientError;
use crate::request::{
    AvatarInfo, AvatarRequest, Continuation, DataRequest, MetadataRequest, Operation,
    SubscriptionRequest, UploadRequest,
};

pub const MISSING_CALLBACK: &str = "Missing callback";

type Validated<T> = Result<T, ClientError>;

/// Ensure the caller supplied a continuation that can still be invoked.
pub fn require_continuation(
    continuation: Option<Continuation>,
    request: &Value,
) -> Validated<Continuation> {
    match continuation {
        Some(continuation) if continuation.is_invokable() => Ok(continuation),
        _ => Err(ClientError::new(MISSING_CALLBACK, request.clone())),
    }
}

/// Validate a payload for `operation` and convert it into a typed request.
pub fn validate(operation: Operation, request: &Value) -> Validated<AvatarRequest> {
    match operation {
        Operation::Upload => upload(request).map(AvatarRequest::Upload),
        Operation::Metadata => metadata(request).map(AvatarRequest::Metadata),
        Operation::Data => data(request).map(AvatarRequest::Data),
        Operation::Subscribe => subscription(request).map(AvatarRequest::Subscribe),
        Operation::Unsubscribe => subscription(request).map(AvatarRequest::Unsubscribe),
    }
}

fn upload(request: &Value) -> Validated<UploadRequest> {
    let content = present(request, "content")
        .ok_or_else(|| missing_key(request, "content"))?
        .as_str()
        .ok_or_else(|| fail(request, "Image content should be a string"))?;

    let id = match present(request, "id") {
        None => None,
        Some(Value::String(id)) => Some(id.clone()),
        Some(_) => return Err(fail(request, "Avatar id should be a string")),
    };

    Ok(UploadRequest {
        content: content.to_string(),
        id,
    })
}

fn metadata(request: &Value) -> Validated<MetadataRequest> {
    if present(request, "disable").is_some() {
        return Ok(MetadataRequest::Disable);
    }

    let bytes = required_attr(request, "bytes")?;
    let id = required_attr(request, "id")?;
    let mime_type = required_attr(request, "type")?;
    let primary = AvatarInfo {
        id,
        bytes,
        mime_type,
        url: optional_attr(request, "url"),
        width: optional_attr(request, "width"),
        height: optional_attr(request, "height"),
    };

    let additional = match present(request, "additional") {
        None => Vec::new(),
        Some(Value::Array(entries)) => entries
            .iter()
            .map(|entry| additional_info(request, entry))
            .collect::<Validated<Vec<_>>>()?,
        Some(_) => return Err(fail(request, "Additional must be an array")),
    };

    Ok(MetadataRequest::Publish {
        primary,
        additional,
    })
}

fn additional_info(request: &Value, entry: &Value) -> Validated<AvatarInfo> {
    let field = |key: &str| {
        present(entry, key)
            .map(attr_value)
            .ok_or_else(|| fail(request, format!("Missing '{key}' key in additional")))
    };

    let id = field("id")?;
    let url = field("url")?;
    let bytes = field("bytes")?;
    let mime_type = field("type")?;

    Ok(AvatarInfo {
        id,
        bytes,
        mime_type,
        url: Some(url),
        width: optional_attr(entry, "width"),
        height: optional_attr(entry, "height"),
    })
}

fn data(request: &Value) -> Validated<DataRequest> {
    let of = entity(request)?;
    let id = required_attr(request, "id")?;
    Ok(DataRequest { of, id })
}

fn subscription(request: &Value) -> Validated<SubscriptionRequest> {
    Ok(SubscriptionRequest {
        of: entity(request)?,
    })
}

fn entity(request: &Value) -> Validated<Jid> {
    let of = present(request, "of")
        .and_then(Value::as_str)
        .ok_or_else(|| missing_key(request, "of"))?;
    Jid::new(of).map_err(|_| fail(request, "Invalid 'of' JID"))
}

fn present<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key).filter(|v| is_truthy(v))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Render a JSON scalar the way it should appear in an XML attribute.
fn attr_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn required_attr(request: &Value, key: &str) -> Validated<String> {
    present(request, key)
        .map(attr_value)
        .ok_or_else(|| missing_key(request, key))
}

fn optional_attr(value: &Value, key: &str) -> Option<String> {
    present(value, key).map(attr_value)
}

fn missing_key(request: &Value, key: &str) -> ClientError {
    fail(request, format!("Missing '{key}' key"))
}

fn fail(request: &Value, description: impl Into<String>) -> ClientError {
    ClientError::new(description, request.clone())
}
