//! Top-level orchestration: writes a prompt and runs the decode loop to completion, wrapping
//! everything in `anyhow::Result` the way integration call sites that don't care about this
//! crate's own error taxonomy expect.

use std::collections::HashMap;

use anyhow::Context;

use crate::interpreter::Interpreter;
use crate::tokenizer::Tokenizer;
use crate::transform::Transform;

/// Writes `prompt` as a user turn, then runs `exec()` to completion and returns the first
/// assistant turn that isn't a tool call.
pub async fn run<T: Tokenizer, M: Transform>(interpreter: &mut Interpreter<T, M>, prompt: &str) -> anyhow::Result<String> {
    interpreter.write("user", prompt, &HashMap::new()).context("writing user turn")?;
    interpreter.exec().await.context("running the decode loop")
}
