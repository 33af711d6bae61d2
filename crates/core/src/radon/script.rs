//! RADON script and result translation.
//!
//! RADON scripts travel as compact CBOR call arrays; reveal and tally
//! results travel as CBOR values, with tag 39 marking a protocol-level
//! error. This module decompiles scripts into the `op().op(arg).` pipeline
//! notation and renders results (including error codes with interpolated
//! numeric arguments) into display strings.

use ciborium::value::Value;

use crate::error::{CoreError, Result};

/// CBOR tag the protocol uses for RADON errors.
const RADON_ERROR_TAG: u64 = 39;

/// Operator code table. Codes the table does not know are rendered as
/// `opcode(0x..)` rather than rejected, since new operators ship with
/// protocol upgrades.
fn op_name(code: u64) -> Option<&'static str> {
    Some(match code {
        0x10 => "count",
        0x11 => "filter",
        0x12 => "flatten",
        0x13 => "getArray",
        0x14 => "getBoolean",
        0x15 => "getBytes",
        0x16 => "getFloat",
        0x17 => "getInteger",
        0x18 => "getMap",
        0x19 => "getString",
        0x1a => "map",
        0x1b => "reduce",
        0x1c => "some",
        0x1d => "sort",
        0x1e => "take",
        0x20 => "asString",
        0x21 => "match",
        0x22 => "negate",
        0x30 => "asString",
        0x31 => "hash",
        0x32 => "length",
        0x40 => "absolute",
        0x41 => "asFloat",
        0x42 => "asString",
        0x43 => "greaterThan",
        0x44 => "lessThan",
        0x45 => "match",
        0x46 => "modulo",
        0x47 => "multiply",
        0x48 => "negate",
        0x49 => "power",
        0x4a => "reciprocal",
        0x4b => "sum",
        0x50 => "absolute",
        0x51 => "asString",
        0x52 => "ceiling",
        0x53 => "greaterThan",
        0x54 => "floor",
        0x55 => "lessThan",
        0x56 => "modulo",
        0x57 => "multiply",
        0x58 => "negate",
        0x59 => "power",
        0x5b => "round",
        0x5d => "truncate",
        0x60 => "entries",
        0x61 => "getArray",
        0x62 => "getBoolean",
        0x63 => "getBytes",
        0x64 => "getFloat",
        0x65 => "getInteger",
        0x66 => "getMap",
        0x67 => "getString",
        0x68 => "keys",
        0x69 => "values",
        0x70 => "asBoolean",
        0x71 => "asBytes",
        0x72 => "asFloat",
        0x73 => "asInteger",
        0x74 => "length",
        0x75 => "match",
        0x76 => "parseJSONArray",
        0x77 => "parseJSONMap",
        0x78 => "parseXMLMap",
        0x79 => "toLowerCase",
        0x7a => "toUpperCase",
        _ => return None,
    })
}

/// Filter code table, used when rendering aggregation/tally stages.
pub fn filter_name(code: u32) -> Option<&'static str> {
    Some(match code {
        0x00 => "greaterThan",
        0x01 => "lessThan",
        0x02 => "equals",
        0x03 => "deviationAbsolute",
        0x04 => "deviationRelative",
        0x05 => "deviationStandard",
        0x06 => "top",
        0x07 => "bottom",
        0x08 => "mode",
        0x80 => "lessOrEqualThan",
        0x81 => "greaterOrEqualThan",
        0x82 => "notEquals",
        0x83 => "notDeviationAbsolute",
        0x84 => "notDeviationRelative",
        0x85 => "notDeviationStandard",
        0x86 => "notTop",
        0x87 => "notBottom",
        0x88 => "notMode",
        _ => return None,
    })
}

/// Reducer code table.
pub fn reducer_name(code: u32) -> Option<&'static str> {
    Some(match code {
        0x00 => "min",
        0x01 => "max",
        0x02 => "mode",
        0x03 => "averageMean",
        0x04 => "averageMeanWeighted",
        0x05 => "averageMedian",
        0x06 => "averageMedianWeighted",
        0x07 => "deviationStandard",
        0x08 => "deviationAverage",
        0x09 => "deviationMedian",
        0x0a => "deviationMaximum",
        0x0b => "hashConcatenate",
        _ => return None,
    })
}

/// Render a filter/reducer stage as a pipeline fragment, e.g.
/// `filter(deviationStandard, 1.5).reduce(averageMean)`.
pub fn translate_filter_stage(filters: &[(u32, String)], reducer: u32) -> String {
    let mut out = String::new();
    for (op, args) in filters {
        let name = filter_name(*op)
            .map(str::to_string)
            .unwrap_or_else(|| format!("0x{op:02x}"));
        if args.is_empty() {
            out.push_str(&format!("filter({name})."));
        } else {
            out.push_str(&format!("filter({name}, {args})."));
        }
    }
    let name = reducer_name(reducer)
        .map(str::to_string)
        .unwrap_or_else(|| format!("0x{reducer:02x}"));
    out.push_str(&format!("reduce({name})"));
    out
}

/// Render an encoder-level filter stage, decoding each filter's CBOR
/// argument for display. Arguments that fail to decode render as hex.
pub fn translate_stage(filters: &[crate::radon::encode::RadFilter], reducer: u32) -> String {
    let rendered: Vec<(u32, String)> = filters
        .iter()
        .map(|filter| {
            let args = if filter.args.is_empty() {
                String::new()
            } else {
                match ciborium::de::from_reader::<Value, _>(filter.args.as_slice()) {
                    Ok(value) => render_value(&value),
                    Err(_) => format!("0x{}", hex::encode(&filter.args)),
                }
            };
            (filter.op, args)
        })
        .collect();
    translate_filter_stage(&rendered, reducer)
}

fn integer_value(value: &Value) -> Option<i128> {
    match value {
        Value::Integer(i) => Some(i128::from(*i)),
        _ => None,
    }
}

/// Render one CBOR value for display.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Integer(i) => i128::from(*i).to_string(),
        Value::Float(f) => format!("{f}"),
        Value::Text(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Bytes(bytes) => format!("0x{}", hex::encode(bytes)),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(render_value).collect();
            format!("[{}]", rendered.join(", "))
        }
        Value::Map(entries) => {
            let rendered: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}: {}", render_value(k), render_value(v)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
        Value::Tag(tag, inner) => format!("tag({tag}, {})", render_value(inner)),
        _ => "?".to_string(),
    }
}

fn render_call_args(args: &[Value]) -> String {
    args.iter()
        .map(render_value)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Decompile a CBOR-encoded RADON script into `op().op(arg).` notation.
pub fn translate_script(script: &[u8]) -> Result<String> {
    if script.is_empty() {
        return Ok(String::new());
    }
    let value: Value = ciborium::de::from_reader(script)
        .map_err(|e| CoreError::MalformedScript(e.to_string()))?;
    let calls = match value {
        Value::Array(calls) => calls,
        other => {
            return Err(CoreError::MalformedScript(format!(
                "expected call array, got {}",
                render_value(&other)
            )))
        }
    };

    let mut out = String::new();
    for call in &calls {
        match call {
            Value::Integer(_) => {
                let code = integer_value(call).unwrap_or_default() as u64;
                match op_name(code) {
                    Some(name) => out.push_str(&format!("{name}().")),
                    None => out.push_str(&format!("opcode(0x{code:02x}).")),
                }
            }
            Value::Array(parts) if !parts.is_empty() => {
                let code = integer_value(&parts[0]).ok_or_else(|| {
                    CoreError::MalformedScript("call array without opcode".to_string())
                })? as u64;
                let args = render_call_args(&parts[1..]);
                match op_name(code) {
                    Some(name) => out.push_str(&format!("{name}({args}).")),
                    None => out.push_str(&format!("opcode(0x{code:02x}, {args}).")),
                }
            }
            other => {
                return Err(CoreError::MalformedScript(format!(
                    "unexpected call: {}",
                    render_value(other)
                )))
            }
        }
    }
    Ok(out)
}

/// Decoded reveal or tally result.
#[derive(Debug, Clone, PartialEq)]
pub struct RadonResult {
    /// False when the payload is a RADON error or does not decode.
    pub success: bool,
    /// Display rendering of the value or error.
    pub text: String,
}

fn describe_error(code: u64, args: &[Value]) -> String {
    match code {
        0x50 => {
            // Insufficient commits carries (received, required).
            if let (Some(got), Some(required)) = (
                args.first().map(render_value),
                args.get(1).map(render_value),
            ) {
                return format!(
                    "Insufficient commits received: {got} available, {required} required"
                );
            }
            "Insufficient commits received".to_string()
        }
        0x51 => {
            // Insufficient consensus carries (achieved, required) percentages.
            if let (Some(achieved), Some(required)) = (
                args.first().map(render_value),
                args.get(1).map(render_value),
            ) {
                return format!(
                    "Insufficient consensus: {achieved}% achieved, {required}% required"
                );
            }
            "Insufficient consensus".to_string()
        }
        0x00 => "Unknown error".to_string(),
        0x01 => "Source script is not valid CBOR".to_string(),
        0x02 => "Source script is not a CBOR array".to_string(),
        0x03 => "Source script is not RADON".to_string(),
        0x10 => "Request contains too many sources".to_string(),
        0x11 => "Script contains too many calls".to_string(),
        0x20 => "Unsupported operator".to_string(),
        0x30 => "HTTP error during retrieval".to_string(),
        0x31 => "Retrieval timed out".to_string(),
        0x40 => "Arithmetic underflow".to_string(),
        0x41 => "Arithmetic overflow".to_string(),
        0x42 => "Division by zero".to_string(),
        0x52 => "Tally execution error".to_string(),
        0x60 => "Malformed reveal".to_string(),
        0x70 => "Array index out of bounds".to_string(),
        0x71 => "Map key not found".to_string(),
        0xff => "Unhandled intercept".to_string(),
        other => format!("RADON error 0x{other:02x}"),
    }
}

/// Decode a CBOR reveal/tally payload into a display result.
///
/// A payload carrying tag 39, or one that does not decode at all, comes
/// back with `success = false`.
pub fn decode_result(payload: &[u8]) -> RadonResult {
    let value: Value = match ciborium::de::from_reader(payload) {
        Ok(value) => value,
        Err(e) => {
            return RadonResult {
                success: false,
                text: format!("Undecodable result: {e}"),
            }
        }
    };

    match value {
        Value::Tag(RADON_ERROR_TAG, inner) => {
            let (code, args): (u64, &[Value]) = match inner.as_ref() {
                Value::Array(parts) if !parts.is_empty() => (
                    integer_value(&parts[0]).unwrap_or(0) as u64,
                    &parts[1..],
                ),
                _ => (0, &[]),
            };
            RadonResult {
                success: false,
                text: describe_error(code, args),
            }
        }
        other => RadonResult {
            success: true,
            text: render_value(&other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cbor(value: &Value) -> Vec<u8> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(value, &mut bytes).unwrap();
        bytes
    }

    #[test]
    fn translates_plain_and_argument_calls() {
        // [0x77, [0x67, "price"], [0x64]] — parseJSONMap().getString(price).getFloat().
        let script = cbor(&Value::Array(vec![
            Value::Integer(0x77.into()),
            Value::Array(vec![
                Value::Integer(0x67.into()),
                Value::Text("price".to_string()),
            ]),
            Value::Array(vec![Value::Integer(0x64.into())]),
        ]));
        assert_eq!(
            translate_script(&script).unwrap(),
            "parseJSONMap().getString(price).getFloat()."
        );
    }

    #[test]
    fn unknown_opcode_renders_hex() {
        let script = cbor(&Value::Array(vec![Value::Integer(0xEE.into())]));
        assert_eq!(translate_script(&script).unwrap(), "opcode(0xee).");
    }

    #[test]
    fn rejects_non_array_script() {
        let script = cbor(&Value::Text("nope".to_string()));
        assert!(translate_script(&script).is_err());
    }

    #[test]
    fn empty_script_is_empty_pipeline() {
        assert_eq!(translate_script(&[]).unwrap(), "");
    }

    #[test]
    fn successful_result_renders_value() {
        let payload = cbor(&Value::Float(1234.5));
        let result = decode_result(&payload);
        assert!(result.success);
        assert_eq!(result.text, "1234.5");
    }

    #[test]
    fn tag39_flips_success() {
        let payload = cbor(&Value::Tag(
            39,
            Box::new(Value::Array(vec![Value::Integer(0x42.into())])),
        ));
        let result = decode_result(&payload);
        assert!(!result.success);
        assert_eq!(result.text, "Division by zero");
    }

    #[test]
    fn insufficient_consensus_interpolates_arguments() {
        let payload = cbor(&Value::Tag(
            39,
            Box::new(Value::Array(vec![
                Value::Integer(0x51.into()),
                Value::Float(60.0),
                Value::Float(70.0),
            ])),
        ));
        let result = decode_result(&payload);
        assert!(!result.success);
        assert_eq!(result.text, "Insufficient consensus: 60% achieved, 70% required");
    }

    #[test]
    fn insufficient_commits_interpolates_arguments() {
        let payload = cbor(&Value::Tag(
            39,
            Box::new(Value::Array(vec![
                Value::Integer(0x50.into()),
                Value::Integer(3.into()),
                Value::Integer(10.into()),
            ])),
        ));
        let result = decode_result(&payload);
        assert!(!result.success);
        assert_eq!(
            result.text,
            "Insufficient commits received: 3 available, 10 required"
        );
    }

    #[test]
    fn undecodable_payload_is_a_failure() {
        let result = decode_result(&[0xff, 0x00, 0x13]);
        assert!(!result.success);
    }

    #[test]
    fn filter_stage_rendering() {
        let rendered = translate_filter_stage(&[(0x05, "1.5".to_string())], 0x03);
        assert_eq!(rendered, "filter(deviationStandard, 1.5).reduce(averageMean)");
        let bare = translate_filter_stage(&[], 0x05);
        assert_eq!(bare, "reduce(averageMedian)");
    }
}
