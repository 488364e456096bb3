//! Recovery hints attached to tool failures.
//!
//! Callers are often agents that retry on their own. A short, specific hint
//! next to the error kind helps them pick a different approach instead of
//! repeating the same call.

use crate::error::ErrorKind;
use crate::tools::names;

/// Suggest how to recover from a failure of `tool` with `kind`.
pub fn recovery_hint(tool: &str, kind: ErrorKind) -> Option<String> {
    let hint = match kind {
        ErrorKind::UnknownTool => "List the available tools and use one of their exact names.",
        ErrorKind::TypeMismatch => {
            "Check parameter names and types against the tool's input schema."
        }
        ErrorKind::MissingRequired => "Supply every parameter the input schema marks as required.",
        ErrorKind::PathEscape => {
            "Paths must stay inside the configured sandbox roots. Use a relative path."
        }
        ErrorKind::OutOfRange => "Adjust the value to the bounds shown in the input schema.",
        ErrorKind::DangerousOperation => {
            "This operation is blocked for safety. Try a narrower, non-destructive alternative."
        }
        ErrorKind::Timeout => match tool {
            names::NMAP_SCAN | names::PORT_SCAN | names::NETWORK_DISCOVERY => {
                "Scan fewer ports or a smaller network, or raise the timeout up to the limit."
            }
            _ => "The operation took too long. Try a smaller request or a longer timeout.",
        },
        ErrorKind::ConnectionError => {
            "Check the host name, port and that the service is reachable from this machine."
        }
        ErrorKind::PermissionError => match tool {
            names::NMAP_SCAN | names::PORT_SCAN => {
                "SYN, UDP and OS scans need elevated privileges. Try a tcp connect scan."
            }
            names::SSH_EXECUTE | names::SSH_COPY_FILE => {
                "Authentication failed. Check the user name, password or key file."
            }
            _ => "The target has restricted permissions. Try a different path or account.",
        },
        ErrorKind::NotFound => match tool {
            names::READ_FILE | names::GET_FILE_INFO | names::LIST_DIRECTORY => {
                "Check the path. Use list_directory to discover what exists."
            }
            _ => "Check that the remote path or resource exists.",
        },
        ErrorKind::BackendError => return None,
    };
    Some(hint.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_on_file_tools_points_at_list_directory() {
        let hint = recovery_hint("read_file", ErrorKind::NotFound).unwrap();
        assert!(hint.contains("list_directory"));
    }

    #[test]
    fn privileged_scan_hint() {
        let hint = recovery_hint("port_scan", ErrorKind::PermissionError).unwrap();
        assert!(hint.contains("tcp connect"));
    }

    #[test]
    fn backend_errors_have_no_generic_hint() {
        assert!(recovery_hint("ftp_list_files", ErrorKind::BackendError).is_none());
    }
}
