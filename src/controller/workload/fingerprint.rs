use super::reconcile::ReconcileError;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use serde_json::Value;

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Compute a stable 16-character fingerprint for a PodTemplateSpec
///
/// The template is written as canonical JSON (object keys sorted at every
/// level, no whitespace) and hashed with 64-bit FNV-1a, so the result does not
/// depend on map ordering or on the process computing it.
///
/// FNV-1a is not collision resistant. Two templates with the same fingerprint
/// are treated as the same generation.
///
/// # Errors
/// Returns `Serialization` if the template cannot be converted to JSON
pub fn fingerprint(template: &PodTemplateSpec) -> Result<String, ReconcileError> {
    let value =
        serde_json::to_value(template).map_err(|e| ReconcileError::Serialization(e.to_string()))?;

    let mut canonical = String::new();
    write_canonical(&value, &mut canonical)?;

    let mut hash = FNV_OFFSET_BASIS;
    for byte in canonical.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    Ok(format!("{hash:016x}"))
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), ReconcileError> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_scalar(&Value::String(key.clone()), out)?;
                out.push(':');
                write_canonical(&map[key], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => write_scalar(scalar, out)?,
    }
    Ok(())
}

fn write_scalar(value: &Value, out: &mut String) -> Result<(), ReconcileError> {
    let raw =
        serde_json::to_string(value).map_err(|e| ReconcileError::Serialization(e.to_string()))?;
    out.push_str(&raw);
    Ok(())
}
