//! End-to-end decoder scenarios against a scripted transform, standing in for the GPU model so
//! generation is deterministic without a real checkpoint: a plain assistant turn, and a
//! command-turn round trip through a declared handler.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde_json::json;

use ferrite_decoder::{CommandTable, Interpreter, SpecialToken, Tokenizer, Transform};

/// A tokenizer double: every distinct text string it's asked to encode becomes its own id,
/// assigned on first use and remembered for `decode`. Good enough for exercising the
/// interpreter's buffer/position bookkeeping without a real byte-pair vocabulary.
struct ScriptedTokenizer {
    words: RefCell<HashMap<String, i32>>,
    rwords: RefCell<HashMap<i32, String>>,
    next_id: RefCell<i32>,
}

impl ScriptedTokenizer {
    fn new() -> Self {
        Self {
            words: RefCell::new(HashMap::new()),
            rwords: RefCell::new(HashMap::new()),
            next_id: RefCell::new(100),
        }
    }

    fn id_for(&self, text: &str) -> i32 {
        if let Some(&id) = self.words.borrow().get(text) {
            return id;
        }
        let id = {
            let mut next = self.next_id.borrow_mut();
            let id = *next;
            *next += 1;
            id
        };
        self.words.borrow_mut().insert(text.to_string(), id);
        self.rwords.borrow_mut().insert(id, text.to_string());
        id
    }
}

impl Tokenizer for ScriptedTokenizer {
    fn encode_text(&self, text: &str, out: &mut Vec<i32>) {
        out.push(self.id_for(text));
    }

    fn encode_special(&self, token: SpecialToken) -> i32 {
        match token {
            SpecialToken::BeginText => 1,
            SpecialToken::EndText => 2,
            SpecialToken::BeginHeader => 3,
            SpecialToken::EndHeader => 4,
            SpecialToken::EndTurn => 5,
            SpecialToken::EndMessage => 6,
            SpecialToken::Ipython => 7,
        }
    }

    fn decode(&self, id: i32) -> String {
        self.rwords.borrow().get(&id).cloned().unwrap_or_default()
    }
}

/// A transform double that ignores its input and plays back a fixed sequence of token ids,
/// one per `step` call.
struct ScriptedTransform {
    script: VecDeque<i32>,
}

impl ScriptedTransform {
    fn new(script: Vec<i32>) -> Self {
        Self { script: script.into() }
    }
}

#[async_trait]
impl Transform for ScriptedTransform {
    async fn step(&mut self, _ids: &[i32], _temperature: f32, _top_p: f32) -> ferrite_decoder::Result<i32> {
        self.script
            .pop_front()
            .ok_or_else(|| ferrite_decoder::Error::Generation("scripted transform ran out of tokens".to_string()))
    }
}

#[tokio::test]
async fn read_decodes_until_end_turn_and_satisfies_the_termination_invariant() {
    let tokenizer = ScriptedTokenizer::new();
    let paris = tokenizer.id_for("Paris");
    let end_turn = tokenizer.encode_special(SpecialToken::EndTurn);
    let transform = ScriptedTransform::new(vec![paris, end_turn]);

    let mut interpreter = Interpreter::new(tokenizer, transform, CommandTable::new(), 0.0, 1.0);
    interpreter.write("user", "What is the capital of France?", &HashMap::new()).unwrap();

    let mut out = String::new();
    interpreter.read(&mut out).await.unwrap();

    assert_eq!(out, "Paris");
    assert!(interpreter.buffer_is_empty());
    // begin_text(1) + user turn(6: header/role/end_header/"\n\n"/content/end_turn) + assistant
    // header(4: header/role/end_header/"\n\n") = 11 ids written, plus the one generated token.
    assert_eq!(interpreter.position(), 12);
}

#[tokio::test]
async fn exec_dispatches_a_declared_command_and_returns_the_next_assistant_turn() {
    let tokenizer = ScriptedTokenizer::new();
    let call_text = format!("<|python_tag|>{}", json!({"name": "multiply", "parameters": {"a": 2, "b": 2}}));
    let call = tokenizer.id_for(&call_text);
    let end_turn = tokenizer.encode_special(SpecialToken::EndTurn);
    let answer = tokenizer.id_for("4");
    let transform = ScriptedTransform::new(vec![call, end_turn, answer, end_turn]);

    let mut commands = CommandTable::new();
    commands.declare("multiply", |params| {
        let a = params["a"].as_f64().unwrap_or(0.0);
        let b = params["b"].as_f64().unwrap_or(0.0);
        json!(a * b)
    });

    let mut interpreter = Interpreter::new(tokenizer, transform, commands, 0.0, 1.0);
    interpreter.write("user", "What is 2+2?", &HashMap::new()).unwrap();

    let reply = interpreter.exec().await.unwrap();
    assert_eq!(reply, "4");
}

#[tokio::test]
async fn exec_returns_unknown_command_error_when_the_call_names_an_undeclared_handler() {
    let tokenizer = ScriptedTokenizer::new();
    let call_text = format!("<|python_tag|>{}", json!({"name": "divide", "parameters": {"a": 4, "b": 2}}));
    let call = tokenizer.id_for(&call_text);
    let end_turn = tokenizer.encode_special(SpecialToken::EndTurn);
    let transform = ScriptedTransform::new(vec![call, end_turn]);

    let mut interpreter = Interpreter::new(tokenizer, transform, CommandTable::new(), 0.0, 1.0);
    interpreter.write("user", "What is 4/2?", &HashMap::new()).unwrap();

    let err = interpreter.exec().await.unwrap_err();
    assert!(matches!(err, ferrite_decoder::Error::UnknownCommand(ref name) if name == "divide"));
}

#[tokio::test]
async fn run_writes_the_prompt_and_returns_the_assistant_reply() {
    let tokenizer = ScriptedTokenizer::new();
    let paris = tokenizer.id_for("Paris");
    let end_turn = tokenizer.encode_special(SpecialToken::EndTurn);
    let transform = ScriptedTransform::new(vec![paris, end_turn]);

    let mut interpreter = Interpreter::new(tokenizer, transform, CommandTable::new(), 0.0, 1.0);
    let reply = ferrite_decoder::run(&mut interpreter, "What is the capital of France?").await.unwrap();

    assert_eq!(reply, "Paris");
}
