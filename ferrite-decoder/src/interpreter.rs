//! The interpreter: owns the id buffer and position counter an `agent` owns upstream, plus a
//! command table `exec()` consults. `write`/`read` mirror `agent::send`/`agent::receive`;
//! `exec` is the addition that lets a turn dispatch a tool call instead of just printing text.

use std::collections::HashMap;

use crate::command::{scan_python_tag, CommandTable};
use crate::template;
use crate::tokenizer::{SpecialToken, Tokenizer};
use crate::transform::Transform;
use crate::{Error, Result};

pub struct Interpreter<T: Tokenizer, M: Transform> {
    tokenizer: T,
    transform: M,
    commands: CommandTable,
    buffer: Vec<i32>,
    position: usize,
    temperature: f32,
    top_p: f32,
}

impl<T: Tokenizer, M: Transform> Interpreter<T, M> {
    pub fn new(tokenizer: T, transform: M, commands: CommandTable, temperature: f32, top_p: f32) -> Self {
        let begin_text = tokenizer.encode_special(SpecialToken::BeginText);
        Self {
            tokenizer,
            transform,
            commands,
            buffer: vec![begin_text],
            position: 0,
            temperature,
            top_p,
        }
    }

    /// Total ids ever written to the buffer plus every id generated by `read`. Together with
    /// `buffer_is_empty`, this is the termination invariant: after a `read` call returns,
    /// the buffer holds nothing and `position` accounts for every id that went in or came out.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn buffer_is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Appends a turn: header, rendered content, terminator. `vars` supplies the values for
    /// any `{{name}}` placeholder in `content`.
    pub fn write(&mut self, role: &str, content: &str, vars: &HashMap<String, String>) -> Result<()> {
        let rendered = template::render(content, vars)?;
        self.buffer.push(self.tokenizer.encode_special(SpecialToken::BeginHeader));
        self.tokenizer.encode_text(role, &mut self.buffer);
        self.buffer.push(self.tokenizer.encode_special(SpecialToken::EndHeader));
        self.tokenizer.encode_text("\n\n", &mut self.buffer);
        self.tokenizer.encode_text(&rendered, &mut self.buffer);
        self.buffer.push(self.tokenizer.encode_special(SpecialToken::EndTurn));
        tracing::trace!(role, len = rendered.len(), "wrote turn");
        Ok(())
    }

    /// Opens an assistant turn, flushes the buffer through the transform, and decodes one
    /// token at a time into `out` until the model predicts a turn/message terminator. On
    /// failure partway through generation, returns `Error::Generation` carrying whatever was
    /// already decoded into `out` — the caller keeps the partial output even though `out`
    /// itself is left holding it directly.
    pub async fn read(&mut self, out: &mut String) -> Result<()> {
        self.buffer.push(self.tokenizer.encode_special(SpecialToken::BeginHeader));
        self.tokenizer.encode_text("assistant", &mut self.buffer);
        self.buffer.push(self.tokenizer.encode_special(SpecialToken::EndHeader));
        self.tokenizer.encode_text("\n\n", &mut self.buffer);

        let ids = std::mem::take(&mut self.buffer);
        self.position += ids.len();

        let end_turn = self.tokenizer.encode_special(SpecialToken::EndTurn);
        let end_message = self.tokenizer.encode_special(SpecialToken::EndMessage);

        tracing::trace!(ids = ids.len(), "flushed buffer, starting generation");

        let mut token = match self.transform.step(&ids, self.temperature, self.top_p).await {
            Ok(token) => token,
            Err(error) => {
                tracing::warn!(%error, "generation failed on the prefill step");
                return Err(Error::Generation(out.clone()));
            }
        };
        loop {
            if token == end_turn || token == end_message {
                tracing::trace!(tokens = self.position, "turn complete");
                return Ok(());
            }
            out.push_str(&self.tokenizer.decode(token));
            self.position += 1;
            token = match self.transform.step(&[token], self.temperature, self.top_p).await {
                Ok(token) => token,
                Err(error) => {
                    tracing::warn!(%error, "generation failed mid-turn");
                    return Err(Error::Generation(out.clone()));
                }
            };
        }
    }

    /// Alternates `read` with command scanning: whenever the assistant's turn ends in a tool
    /// call, the named handler runs and its result is written back as an `ipython` turn before
    /// the next `read`. Returns the first assistant turn that doesn't end in a tool call.
    pub async fn exec(&mut self) -> Result<String> {
        loop {
            let mut out = String::new();
            self.read(&mut out).await?;
            match scan_python_tag(&out) {
                Some(call) => {
                    tracing::debug!(command = %call.name, "dispatching command turn");
                    let result = self.commands.call(&call.name, call.parameters)?;
                    let mut vars = HashMap::new();
                    vars.insert("output".to_string(), result.to_string());
                    self.write("ipython", "{{output}}", &vars)?;
                }
                None => return Ok(out),
            }
        }
    }
}
