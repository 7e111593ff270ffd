//! Line-based prompt engine reading answers from an async reader (stdin by default).

use crate::prompt::types::*;
use async_trait::async_trait;
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Stdin};
use tokio::sync::Mutex;

pub struct TerminalPrompt<R> {
    input: Mutex<BufReader<R>>,
}

impl TerminalPrompt<Stdin> {
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

impl<R: AsyncRead + Unpin + Send> TerminalPrompt<R> {
    pub fn new(reader: R) -> Self {
        Self {
            input: Mutex::new(BufReader::new(reader)),
        }
    }
}

/// Process-wide stdin engine, so buffered input survives across prompts.
pub(crate) fn shared_stdin() -> Arc<dyn PromptEngine> {
    static STDIN: OnceLock<Arc<TerminalPrompt<Stdin>>> = OnceLock::new();
    STDIN.get_or_init(|| Arc::new(TerminalPrompt::stdin())).clone()
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send + 'static> PromptEngine for TerminalPrompt<R> {
    async fn prompt(
        &self,
        request: PromptRequest,
    ) -> Result<HashMap<String, Value>, PromptEngineError> {
        let mut input = self.input.lock().await;
        let mut answers = HashMap::new();

        for question in &request.questions {
            write_question(&request.output, question)?;

            let mut line = String::new();
            if input.read_line(&mut line).await? == 0 {
                return Err(PromptEngineError::Cancelled);
            }

            let answer = parse_answer(question, line.trim())?;
            answers.insert(question.name.clone(), answer);
        }

        Ok(answers)
    }
}

fn write_question(output: &PromptWriter, question: &PromptQuestion) -> std::io::Result<()> {
    let mut output = match output.lock() {
        Ok(output) => output,
        Err(poisoned) => poisoned.into_inner(),
    };

    if question.kind == QuestionKind::Select {
        writeln!(output, "? {}", question.message)?;
        for (index, choice) in question.choices.iter().enumerate() {
            writeln!(output, "  {}) {}", index + 1, choice)?;
        }
        write!(output, "› ")?;
    } else {
        let hint = match (&question.kind, &question.initial) {
            (QuestionKind::Confirm, Some(Value::Bool(true))) => " (Y/n)".to_string(),
            (QuestionKind::Confirm, _) => " (y/N)".to_string(),
            (_, Some(initial)) => format!(" [{}]", display_value(initial)),
            _ => String::new(),
        };
        write!(output, "? {}{} › ", question.message, hint)?;
    }

    output.flush()
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn invalid(question: &PromptQuestion, reason: impl Into<String>) -> PromptEngineError {
    PromptEngineError::InvalidAnswer {
        question: question.name.clone(),
        reason: reason.into(),
    }
}

/// Turn a raw answer line into a JSON value according to the question kind.
pub(crate) fn parse_answer(question: &PromptQuestion, raw: &str) -> Result<Value, PromptEngineError> {
    if raw.is_empty() {
        if let Some(initial) = &question.initial {
            return Ok(initial.clone());
        }
    }

    match &question.kind {
        QuestionKind::Input => Ok(Value::String(raw.to_string())),
        QuestionKind::Confirm => match raw.to_ascii_lowercase().as_str() {
            "y" | "yes" | "true" => Ok(Value::Bool(true)),
            "" | "n" | "no" | "false" => Ok(Value::Bool(false)),
            other => Err(invalid(question, format!("expected yes or no, got '{other}'"))),
        },
        QuestionKind::Number => {
            if let Ok(integer) = raw.parse::<i64>() {
                return Ok(Value::Number(integer.into()));
            }
            raw.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| invalid(question, format!("'{raw}' is not a number")))
        }
        QuestionKind::Select => {
            let choices = &question.choices;
            if let Ok(index) = raw.parse::<usize>() {
                if let Some(choice) = index.checked_sub(1).and_then(|i| choices.get(i)) {
                    return Ok(Value::String(choice.clone()));
                }
            }
            if raw.is_empty() {
                if let Some(first) = choices.first() {
                    return Ok(Value::String(first.clone()));
                }
            }
            choices
                .iter()
                .find(|choice| choice.as_str() == raw)
                .map(|choice| Value::String(choice.clone()))
                .ok_or_else(|| invalid(question, format!("'{raw}' is not one of the choices")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(questions: Vec<PromptQuestion>) -> (PromptRequest, Arc<std::sync::Mutex<Vec<u8>>>) {
        let buffer = Arc::new(std::sync::Mutex::new(Vec::new()));
        let output: PromptWriter = buffer.clone();
        (PromptRequest { questions, output }, buffer)
    }

    #[tokio::test]
    async fn test_reads_one_line_per_question() {
        let engine = TerminalPrompt::new(&b"release\ny\n2\n"[..]);
        let (request, buffer) = request(vec![
            PromptQuestion::input("name", "Name?"),
            PromptQuestion::confirm("go", "Continue?"),
            PromptQuestion::select("env", "Where?", ["staging", "prod"]),
        ]);

        let answers = engine.prompt(request).await.unwrap();

        assert_eq!(answers["name"], json!("release"));
        assert_eq!(answers["go"], json!(true));
        assert_eq!(answers["env"], json!("prod"));

        let written = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(written.contains("? Name? › "));
        assert!(written.contains("  2) prod"));
    }

    #[tokio::test]
    async fn test_end_of_input_cancels() {
        let engine = TerminalPrompt::new(&b""[..]);
        let (request, _) = request(vec![PromptQuestion::input("name", "Name?")]);

        let result = engine.prompt(request).await;
        assert!(matches!(result, Err(PromptEngineError::Cancelled)));
    }

    #[test]
    fn test_parse_answer_kinds() {
        let number = PromptQuestion::number("n", "How many?");
        assert_eq!(parse_answer(&number, "3").unwrap(), json!(3));
        assert_eq!(parse_answer(&number, "1.5").unwrap(), json!(1.5));
        assert!(parse_answer(&number, "many").is_err());

        let initial = PromptQuestion::input("name", "Name?").with_initial("anon");
        assert_eq!(parse_answer(&initial, "").unwrap(), json!("anon"));

        let confirm = PromptQuestion::confirm("go", "Go?");
        assert_eq!(parse_answer(&confirm, "").unwrap(), json!(false));
        assert!(parse_answer(&confirm, "maybe").is_err());

        let select = PromptQuestion::select("env", "Where?", ["a", "b"]);
        assert_eq!(parse_answer(&select, "b").unwrap(), json!("b"));
        assert_eq!(parse_answer(&select, "").unwrap(), json!("a"));
        assert!(parse_answer(&select, "9").is_err());
    }
}
