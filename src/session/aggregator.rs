//! Tool-Call Delta Aggregation
//!
//! Rebuilds complete tool calls from streamed fragments. Fragments are applied
//! strictly in arrival order and argument chunks are concatenated verbatim,
//! since a JSON argument string can be split anywhere.

use crate::api::completion::{FunctionCall, ToolCall};
use crate::api::streaming::{StreamDelta, ToolCallDelta};
use crate::error::{FragmentViolation, GlmError, Result};

/// Reducer over the streamed deltas of one response
#[derive(Debug, Default)]
pub struct DeltaAggregator {
    calls: Vec<ToolCall>,
}

impl DeltaAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one delta. Returns its text for immediate display, if any.
    pub fn push_delta(&mut self, delta: &StreamDelta) -> Result<Option<String>> {
        if let Some(fragments) = &delta.tool_calls {
            for fragment in fragments {
                self.push_fragment(fragment)?;
            }
        }

        Ok(delta.content.clone().filter(|text| !text.is_empty()))
    }

    /// Apply one tool-call fragment
    pub fn push_fragment(&mut self, fragment: &ToolCallDelta) -> Result<()> {
        let index = fragment.index as usize;
        let chunk = fragment.arguments_chunk();
        let len = self.calls.len();

        let violation = match fragment.opener_id() {
            Some(id) => match self.calls.get_mut(index) {
                // The same id repeated on its own slot is a continuation
                Some(call) if call.id == id => {
                    call.function.arguments.push_str(chunk);
                    return Ok(());
                }
                Some(call) => FragmentViolation::SlotAlreadyOpen {
                    existing_id: call.id.clone(),
                },
                None if index == len => {
                    self.calls.push(open_call(id, fragment));
                    return Ok(());
                }
                None => FragmentViolation::IndexGap { expected: len },
            },
            None => match self.calls.get_mut(index) {
                Some(call) => {
                    call.function.arguments.push_str(chunk);
                    return Ok(());
                }
                None => FragmentViolation::ContinuationWithoutOpener,
            },
        };

        Err(GlmError::DanglingFragment {
            index: fragment.index,
            violation,
        })
    }

    /// Calls aggregated so far
    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    /// Final list of calls once the stream has ended
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
    }
}

fn open_call(id: &str, fragment: &ToolCallDelta) -> ToolCall {
    let call_type = fragment
        .call_type
        .clone()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "function".to_string());
    let name = fragment
        .function
        .as_ref()
        .and_then(|f| f.name.clone())
        .unwrap_or_default();

    ToolCall {
        id: id.to_string(),
        call_type,
        function: FunctionCall {
            name,
            arguments: fragment.arguments_chunk().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate(fragments: &[ToolCallDelta]) -> Result<Vec<ToolCall>> {
        let mut aggregator = DeltaAggregator::new();
        for fragment in fragments {
            aggregator.push_fragment(fragment)?;
        }
        Ok(aggregator.finish())
    }

    #[test]
    fn test_opener_and_continuation() {
        let calls = aggregate(&[
            ToolCallDelta::opener(0, "c1", "lookup", "{\"q\":"),
            ToolCallDelta::continuation(0, "\"x\"}"),
        ])
        .unwrap();

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].call_type, "function");
        assert_eq!(calls[0].function.name, "lookup");
        assert_eq!(calls[0].function.arguments, "{\"q\":\"x\"}");
    }

    #[test]
    fn test_interleaved_calls() {
        let calls = aggregate(&[
            ToolCallDelta::opener(0, "a", "first", "["),
            ToolCallDelta::opener(1, "b", "second", "{"),
            ToolCallDelta::continuation(0, "1,"),
            ToolCallDelta::continuation(1, "}"),
            ToolCallDelta::continuation(0, "2]"),
        ])
        .unwrap();

        assert_eq!(calls[0].function.arguments, "[1,2]");
        assert_eq!(calls[1].function.arguments, "{}");
    }

    #[test]
    fn test_arguments_are_exact_concatenation() {
        let arguments = r#"{"city":"Zürich","note":"naïve ☃ \"quoted\""}"#;
        let boundaries: Vec<usize> = arguments
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(arguments.len()))
            .collect();

        // every split into a prefix, a middle and a suffix at char boundaries
        for (a, &i) in boundaries.iter().enumerate() {
            for &j in &boundaries[a..] {
                let calls = aggregate(&[
                    ToolCallDelta::opener(0, "c1", "f", &arguments[..i]),
                    ToolCallDelta::continuation(0, &arguments[i..j]),
                    ToolCallDelta::continuation(0, &arguments[j..]),
                ])
                .unwrap();
                assert_eq!(calls[0].function.arguments, arguments);
            }
        }
    }

    #[test]
    fn test_continuation_without_opener() {
        let err = aggregate(&[ToolCallDelta::continuation(0, "{}")]).unwrap_err();
        assert!(matches!(
            err,
            GlmError::DanglingFragment {
                index: 0,
                violation: FragmentViolation::ContinuationWithoutOpener
            }
        ));

        let err = aggregate(&[
            ToolCallDelta::opener(0, "c1", "f", ""),
            ToolCallDelta::continuation(1, "{}"),
        ])
        .unwrap_err();
        assert!(matches!(err, GlmError::DanglingFragment { index: 1, .. }));
    }

    #[test]
    fn test_second_opener_on_same_index() {
        let err = aggregate(&[
            ToolCallDelta::opener(0, "c1", "f", ""),
            ToolCallDelta::opener(0, "c2", "g", ""),
        ])
        .unwrap_err();

        match err {
            GlmError::DanglingFragment {
                violation: FragmentViolation::SlotAlreadyOpen { existing_id },
                ..
            } => assert_eq!(existing_id, "c1"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_repeated_id_is_continuation() {
        let calls = aggregate(&[
            ToolCallDelta::opener(0, "c1", "f", "{\"a\""),
            ToolCallDelta {
                id: Some("c1".to_string()),
                ..ToolCallDelta::continuation(0, ":1}")
            },
        ])
        .unwrap();
        assert_eq!(calls[0].function.arguments, "{\"a\":1}");
    }

    #[test]
    fn test_opener_skipping_index() {
        let err = aggregate(&[ToolCallDelta::opener(2, "c1", "f", "")]).unwrap_err();
        assert!(matches!(
            err,
            GlmError::DanglingFragment {
                violation: FragmentViolation::IndexGap { expected: 0 },
                ..
            }
        ));
    }

    #[test]
    fn test_missing_type_defaults_to_function() {
        let opener = ToolCallDelta {
            call_type: None,
            ..ToolCallDelta::opener(0, "c1", "f", "")
        };
        let calls = aggregate(&[opener]).unwrap();
        assert_eq!(calls[0].call_type, "function");
    }

    #[test]
    fn test_push_delta_returns_text() {
        let mut aggregator = DeltaAggregator::new();

        assert_eq!(
            aggregator.push_delta(&StreamDelta::text("Hel")).unwrap(),
            Some("Hel".to_string())
        );
        assert_eq!(aggregator.push_delta(&StreamDelta::text("")).unwrap(), None);

        let mixed = StreamDelta {
            content: Some("lo".to_string()),
            tool_calls: Some(vec![ToolCallDelta::opener(0, "c1", "f", "{}")]),
            ..Default::default()
        };
        assert_eq!(aggregator.push_delta(&mixed).unwrap(), Some("lo".to_string()));
        assert_eq!(aggregator.calls().len(), 1);
    }
}
