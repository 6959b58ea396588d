//! Llama 3 chat template.

use crate::model::types::{ConversationTurn, Role};

pub const BEGIN_OF_TEXT: &str = "<|begin_of_text|>";
pub const START_HEADER: &str = "<|start_header_id|>";
pub const END_HEADER: &str = "<|end_header_id|>";
pub const END_OF_TURN: &str = "<|eot_id|>";
pub const END_OF_TEXT: &str = "<|end_of_text|>";

/// Markers that end generation; they mirror the ones emitted by [`render_prompt`].
pub fn stop_markers() -> Vec<String> {
    vec![END_OF_TURN.to_string(), END_OF_TEXT.to_string()]
}

/// Renders the turns in order and leaves an open assistant header for the
/// model to continue from.
pub fn render_prompt(turns: &[ConversationTurn]) -> String {
    let body: usize = turns.iter().map(|t| t.content.len() + 48).sum();
    let mut prompt = String::with_capacity(BEGIN_OF_TEXT.len() + body + 48);

    prompt.push_str(BEGIN_OF_TEXT);
    for turn in turns {
        push_header(&mut prompt, turn.role);
        prompt.push_str(&turn.content);
        prompt.push_str(END_OF_TURN);
    }
    push_header(&mut prompt, Role::Assistant);
    prompt
}

/// Byte offset of the earliest stop marker in `text`, if any.
pub fn find_stop(text: &str, stop: &[String]) -> Option<usize> {
    stop.iter()
        .filter(|marker| !marker.is_empty())
        .filter_map(|marker| text.find(marker.as_str()))
        .min()
}

fn push_header(prompt: &mut String, role: Role) {
    prompt.push_str(START_HEADER);
    prompt.push_str(role.as_str());
    prompt.push_str(END_HEADER);
    prompt.push_str("\n\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_user_turn() {
        let turns = [ConversationTurn::new(Role::User, "hi")];
        assert_eq!(
            render_prompt(&turns),
            "<|begin_of_text|><|start_header_id|>user<|end_header_id|>\n\nhi<|eot_id|>\
             <|start_header_id|>assistant<|end_header_id|>\n\n"
        );
    }

    #[test]
    fn rendering_is_deterministic() {
        let turns = [ConversationTurn::new(Role::User, "hi")];
        let first = render_prompt(&turns);
        for _ in 0..16 {
            assert_eq!(render_prompt(&turns).as_bytes(), first.as_bytes());
        }
    }

    #[test]
    fn turn_order_is_preserved() {
        let turns = [
            ConversationTurn::new(Role::System, "You are helpful."),
            ConversationTurn::new(Role::User, "2+2?"),
            ConversationTurn::new(Role::Assistant, "4"),
            ConversationTurn::new(Role::User, "and 3+3?"),
        ];
        let prompt = render_prompt(&turns);
        let positions: Vec<usize> = ["You are helpful.", "2+2?", ">\n\n4<", "and 3+3?"]
            .iter()
            .map(|needle| prompt.find(needle).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(prompt.matches(END_OF_TURN).count(), 4);
        assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
    }

    #[test]
    fn empty_conversation_only_opens_assistant_turn() {
        assert_eq!(
            render_prompt(&[]),
            "<|begin_of_text|><|start_header_id|>assistant<|end_header_id|>\n\n"
        );
    }

    #[test]
    fn earliest_stop_marker_wins() {
        let stop = stop_markers();
        assert_eq!(find_stop("4<|end_of_text|>x<|eot_id|>", &stop), Some(1));
        assert_eq!(find_stop("plain answer", &stop), None);
        assert_eq!(find_stop("anything", &[String::new()]), None);
    }

    #[test]
    fn stop_markers_match_template() {
        assert_eq!(stop_markers(), vec!["<|eot_id|>", "<|end_of_text|>"]);
    }
}
