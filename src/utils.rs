use rustyline::{error::ReadlineError, DefaultEditor};

/// Ask `question`, showing `default` in brackets. A blank answer or end of
/// input keeps the default and yields `None`.
pub fn prompt_field(
    rl: &mut DefaultEditor,
    question: &str,
    default: &str,
) -> anyhow::Result<Option<String>> {
    let response = match rl.readline(&format!("{question} [{default}]: ")) {
        Ok(line) => line,
        Err(ReadlineError::Eof) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let response = response.trim();
    Ok((!response.is_empty()).then(|| response.to_owned()))
}
