use log::error;

/// Logs the full context chain of `error` and hands it back to the caller.
pub fn handle_error(error: anyhow::Error) -> anyhow::Error {
    let chain: Vec<String> = error.chain().map(|e| e.to_string()).collect();
    error!("{}", chain.join("\ncaused by: "));
    error
}
