//! Optional RPC payload builder for a typed subset of parameters.
//!
//! This constructs only the RPC request payload (procedure name, option
//! flags, and parameters) — not the outer TDS packet header, which the
//! connection pipe attaches separately. It is gated behind
//! `RPC_REPACK_BUILDER` and used only when in-place rewrite cannot apply
//! (e.g. the new value is longer than the old one and truncation is
//! disallowed).
//!
//! `INT`, `BIT`, and `NVARCHAR` get dedicated wire encodings; these are the
//! only concrete encodings currently implemented. Every
//! other named type in the procedure/parameter type map (`DECIMAL`,
//! `NUMERIC`, `DATE`, `TIME`, `DATETIME2`, `DATETIMEOFFSET`,
//! `UNIQUEIDENTIFIER`, `VARBINARY`) falls back to NVARCHAR-encoding the
//! value's normalized string form rather than risk an incorrect fixed-width
//! encoding for a type this builder has never implemented.

/// TDS type id for a nullable 4-byte integer.
const TDS_INTN: u8 = 0x26;
/// TDS type id for a nullable 1-byte boolean.
const TDS_BITN: u8 = 0x68;
/// TDS type id for a UTF-16LE variable-length string.
const TDS_NVARCHAR: u8 = 0xE7;

/// Maximum NVARCHAR byte length this builder declares (4000 UTF-16 chars).
const NVARCHAR_MAX_LEN: u16 = 8000;

/// One RPC parameter to encode: name (with or without leading `@`), literal
/// value, and a type name as it appears in the procedure/parameter type map.
#[derive(Debug, Clone)]
pub struct ParamValue {
    /// Parameter name.
    pub name: String,
    /// Literal value, already normalized if applicable.
    pub value: String,
    /// Declared type (case-insensitive): `"int"`, `"bit"`, or anything else
    /// (encoded as NVARCHAR).
    pub ty: String,
}

fn us_varchar(s: &str) -> Vec<u8> {
    let mut bytes: Vec<u8> = s.bytes().filter(u8::is_ascii).collect();
    bytes.truncate(255);
    let mut out = Vec::with_capacity(bytes.len() + 1);
    out.push(bytes.len() as u8);
    out.extend(bytes);
    out
}

fn collation_bytes() -> [u8; 5] {
    // Best-effort default collation (LCID 0x0409 en-US, sort id 0).
    [0x09, 0x04, 0x00, 0x00, 0x00]
}

/// Build an RPC request payload for `proc_name` with the given parameters.
#[must_use]
pub fn build_rpc_payload(proc_name: &str, params: &[ParamValue]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(us_varchar(proc_name));
    out.extend([0x00, 0x00]); // option flags

    for p in params {
        let pname = if p.name.starts_with('@') {
            p.name.clone()
        } else {
            format!("@{}", p.name)
        };
        out.extend(us_varchar(&pname));
        out.push(0x00); // status: input parameter
        out.extend([0x00, 0x00, 0x00, 0x00]); // usertype
        out.extend([0x00, 0x00]); // flags

        match p.ty.to_lowercase().as_str() {
            "int" => {
                out.push(TDS_INTN);
                out.push(0x04); // max length
                let iv: i32 = p.value.parse().unwrap_or(0);
                out.push(0x04); // actual length
                out.extend(iv.to_le_bytes());
            }
            "bit" => {
                out.push(TDS_BITN);
                out.push(0x01); // max length
                let bv = matches!(p.value.trim().to_lowercase().as_str(), "1" | "true" | "yes");
                out.push(0x01); // actual length
                out.push(u8::from(bv));
            }
            _ => {
                out.push(TDS_NVARCHAR);
                out.extend(NVARCHAR_MAX_LEN.to_le_bytes());
                out.extend(collation_bytes());
                let data: Vec<u8> = p.value.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
                out.extend((data.len() as u16).to_le_bytes());
                out.extend(data);
            }
        }
    }

    out
}
