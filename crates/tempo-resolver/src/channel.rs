//! The code-submission side of a plugin's script execution environment.
//!
//! Evaluation is fire-and-forget: submitted code produces no return value,
//! and anything the script wants to tell the host comes back later through
//! [`ScriptAccount::on_message`](crate::account::ScriptAccount::on_message).

use tokio::sync::mpsc;

/// Submission path into one plugin's execution context.
///
/// Implementations must evaluate submissions in the order they were made and
/// must never block the caller.
pub trait ScriptChannel: Send + Sync {
    fn submit(&self, code: String);
}

/// Channel that queues submissions for an execution environment running
/// elsewhere.
///
/// The environment drains the receiver returned by [`QueuedChannel::new`]
/// and evaluates each string in order.
#[derive(Debug, Clone)]
pub struct QueuedChannel {
    tx: mpsc::UnboundedSender<String>,
}

impl QueuedChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ScriptChannel for QueuedChannel {
    fn submit(&self, code: String) {
        if self.tx.send(code).is_err() {
            tracing::warn!("script environment has shut down, dropping submission");
        }
    }
}

// ─── Script-side API ────────────────────────────────────────────────────

/// Maximum length of script-supplied text in log lines.
const MAX_LOGGED_TEXT_LEN: usize = 512;

/// Strip control characters and truncate script-supplied text before it is
/// logged.
pub(crate) fn sanitize_log_text(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_LOGGED_TEXT_LEN)
        .collect();
    if text.chars().count() > MAX_LOGGED_TEXT_LEN {
        format!("{cleaned}… (truncated)")
    } else {
        cleaned
    }
}

/// Escape a string for embedding inside a single- or double-quoted JS
/// string literal.
///
/// Everything outside printable ASCII is emitted as `\uXXXX` (UTF-16 code
/// units) so the code survives any transport that is not 8-bit clean.
pub fn escape_js(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    for c in input.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\/"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{unit:04X}"));
                }
            }
        }
    }
    out
}

/// Code invoking `method` on a script object, with `args` passed as JSON.
pub fn invoke_code(
    request_id: &str,
    object_id: &str,
    method: &str,
    args: &serde_json::Value,
) -> String {
    format!(
        "Tomahawk.PluginManager.invoke('{}','{}','{}',JSON.parse('{}'))",
        escape_js(request_id),
        escape_js(object_id),
        escape_js(method),
        escape_js(&args.to_string()),
    )
}

/// Code asking the script side to register its resolver instance under
/// `capability`.
pub fn register_code(capability: &str) -> String {
    format!(
        "Tomahawk.PluginManager.registerPlugin('{}', Tomahawk.resolver.instance);",
        escape_js(capability)
    )
}

/// Code asking the script side to drop `object_id` from `capability`.
pub fn unregister_code(capability: &str, object_id: &str) -> String {
    format!(
        "Tomahawk.PluginManager.unregisterPlugin('{}', '{}');",
        escape_js(capability),
        escape_js(object_id)
    )
}

/// Code delivering the reply to a native service call.
pub fn native_result_code(request_id: u64, result: Option<&serde_json::Value>) -> String {
    match result {
        None => format!(
            "Tomahawk.NativeScriptJobManager.reportNativeScriptJobResult( {request_id} );"
        ),
        Some(value) => {
            // JSON is valid JS except for raw U+2028/U+2029 inside strings.
            let literal = value
                .to_string()
                .replace('\u{2028}', "\\u2028")
                .replace('\u{2029}', "\\u2029");
            format!(
                "Tomahawk.NativeScriptJobManager.reportNativeScriptJobResult( {request_id}, {literal} );"
            )
        }
    }
}
