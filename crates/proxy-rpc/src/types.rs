//! Loading the optional procedure/parameter → TDS type map used by the
//! repack builder.

use std::collections::HashMap;
use std::path::Path;

/// `proc_name (lowercase) -> param_name (lowercase, no leading @) -> type`.
pub type ParamTypeMap = HashMap<String, HashMap<String, String>>;

/// Load a parameter type map from a JSON file.
///
/// Returns an empty map if the file does not exist or fails to parse —
/// this is an optional refinement to the repack builder, never a startup
/// requirement.
#[must_use]
pub fn load_param_types(path: &Path) -> ParamTypeMap {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return ParamTypeMap::new();
    };
    let Ok(parsed) = serde_json::from_str::<HashMap<String, HashMap<String, String>>>(&raw) else {
        tracing::warn!(path = %path.display(), "failed to parse RPC param type map; ignoring");
        return ParamTypeMap::new();
    };

    parsed
        .into_iter()
        .map(|(proc, params)| {
            let params = params
                .into_iter()
                .map(|(name, ty)| (name.trim_start_matches('@').to_lowercase(), ty))
                .collect();
            (proc.to_lowercase(), params)
        })
        .collect()
}

/// Look up the configured type for `proc`/`param`, case- and `@`-insensitively.
#[must_use]
pub fn lookup<'a>(map: &'a ParamTypeMap, proc: &str, param: &str) -> Option<&'a str> {
    let proc_entry = map.get(&proc.to_lowercase())?;
    let param_key = param.trim_start_matches('@').to_lowercase();
    proc_entry.get(&param_key).map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_empty_map() {
        let map = load_param_types(Path::new("/nonexistent/path/rpc_param_types.json"));
        assert!(map.is_empty());
    }

    #[test]
    fn loads_and_normalizes_keys() {
        let mut file = tempfile_json(r#"{"dbo.UpdateUser": {"@Email": "nvarchar", "Age": "int"}}"#);
        let map = load_param_types(file.path());
        assert_eq!(lookup(&map, "DBO.UPDATEUSER", "email"), Some("nvarchar"));
        assert_eq!(lookup(&map, "dbo.UpdateUser", "@Age"), Some("int"));
        file.close();
    }

    struct TempJson {
        path: std::path::PathBuf,
    }

    impl TempJson {
        fn path(&self) -> &Path {
            &self.path
        }
        fn close(self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn tempfile_json(contents: &str) -> TempJson {
        let path = std::env::temp_dir().join(format!(
            "proxy-rpc-test-{}.json",
            std::process::id()
        ));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        TempJson { path }
    }
}
