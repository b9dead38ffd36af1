//! Streaming generation coordination and chat templating.
//!
//! The coordinator drains a [`ChunkStream`] synchronously: in streaming mode
//! every yielded chunk goes out as a `chunk` line and the final accumulated
//! text closes the request with a single `complete` line; in non-streaming
//! mode only the `complete` line is written.

use std::io::Write;

use crate::backend::{ChunkStream, GenerationModel, GenerationParams};
use crate::error::LateralError;
use crate::server::protocol::{ChatTurn, Response};
use crate::server::runloop::ResponseWriter;

/// Render chat history into a ChatML prompt.
///
/// Each turn becomes `<|im_start|>{role}\n{content}<|im_end|>\n`; the prompt
/// ends with an open assistant turn for the model to complete. Turns with a
/// role other than system/user/assistant are skipped.
pub fn render_chat_prompt(messages: &[ChatTurn]) -> String {
    let mut prompt = String::new();
    for turn in messages {
        match turn.role.as_str() {
            "system" | "user" | "assistant" => {
                prompt.push_str("<|im_start|>");
                prompt.push_str(&turn.role);
                prompt.push('\n');
                prompt.push_str(&turn.content);
                prompt.push_str("<|im_end|>\n");
            }
            _ => {}
        }
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

/// Drive one generation request to completion.
///
/// Returns the terminal `complete` response; the run loop writes it. Chunks
/// carry the full accumulated text (cumulative framing), so a parent can
/// render the latest chunk without reassembly.
pub fn run_generation<M, W>(
    model: &mut M,
    prompt: &str,
    params: &GenerationParams,
    stream: bool,
    writer: &mut ResponseWriter<W>,
) -> Result<Response, LateralError>
where
    M: GenerationModel + ?Sized,
    W: Write,
{
    let mut chunks = model.generate(prompt, params)?;
    let final_text = drain(chunks.as_mut(), stream, writer)?;
    Ok(Response::Complete {
        content: final_text,
    })
}

fn drain<W: Write>(
    chunks: &mut dyn ChunkStream,
    stream: bool,
    writer: &mut ResponseWriter<W>,
) -> Result<String, LateralError> {
    let mut last = String::new();
    while let Some(accumulated) = chunks.next_chunk()? {
        if stream {
            writer.write(&Response::Chunk {
                content: accumulated.clone(),
            })?;
        }
        last = accumulated;
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GenerationBackend, StubGenerationBackend};

    fn turn(role: &str, content: &str) -> ChatTurn {
        ChatTurn {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    fn default_params() -> GenerationParams {
        GenerationParams {
            max_tokens: 64,
            temperature: 0.7,
            top_p: 0.9,
        }
    }

    fn collect_lines(buf: &[u8]) -> Vec<serde_json::Value> {
        String::from_utf8(buf.to_vec())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_chat_template_shape() {
        let prompt = render_chat_prompt(&[
            turn("system", "You are helpful."),
            turn("user", "Hi"),
        ]);
        assert_eq!(
            prompt,
            "<|im_start|>system\nYou are helpful.<|im_end|>\n\
             <|im_start|>user\nHi<|im_end|>\n\
             <|im_start|>assistant\n"
        );
    }

    #[test]
    fn test_chat_template_skips_unknown_roles() {
        let prompt = render_chat_prompt(&[turn("tool", "ignored"), turn("user", "Hi")]);
        assert!(!prompt.contains("ignored"));
        assert!(prompt.contains("<|im_start|>user\nHi<|im_end|>\n"));
    }

    #[test]
    fn test_empty_history_still_opens_assistant_turn() {
        assert_eq!(render_chat_prompt(&[]), "<|im_start|>assistant\n");
    }

    #[test]
    fn test_streaming_emits_chunks_then_one_complete() {
        let mut backend = StubGenerationBackend::new();
        let mut model = backend.load("m", None).unwrap();
        let mut out = Vec::new();
        let terminal = {
            let mut writer = ResponseWriter::new(&mut out);
            run_generation(&mut model, "hello there", &default_params(), true, &mut writer)
                .unwrap()
        };

        let lines = collect_lines(&out);
        assert!(lines.len() > 1);
        let mut prev_len = 0;
        for line in &lines {
            assert_eq!(line["type"], "chunk");
            assert_eq!(line["done"], false);
            let content = line["content"].as_str().unwrap();
            assert!(content.len() > prev_len);
            prev_len = content.len();
        }
        // terminal carries the full accumulated text
        match terminal {
            Response::Complete { content } => {
                assert_eq!(
                    content,
                    lines.last().unwrap()["content"].as_str().unwrap()
                );
            }
            other => panic!("unexpected terminal: {other:?}"),
        }
    }

    #[test]
    fn test_non_streaming_writes_no_chunks() {
        let mut backend = StubGenerationBackend::new();
        let mut model = backend.load("m", None).unwrap();
        let mut out = Vec::new();
        let terminal = {
            let mut writer = ResponseWriter::new(&mut out);
            run_generation(&mut model, "hello there", &default_params(), false, &mut writer)
                .unwrap()
        };
        assert!(out.is_empty());
        match terminal {
            Response::Complete { content } => assert!(!content.is_empty()),
            other => panic!("unexpected terminal: {other:?}"),
        }
    }
}
