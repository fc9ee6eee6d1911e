//! Topic list parsing.

/// Config key holding the comma separated input topics.
pub const INPUT_TOPICS_KEY: &str = "InputTopics";

/// Config key holding the comma separated output topics.
pub const OUTPUT_TOPICS_KEY: &str = "OutputTopics";

/// Suffix appended to an input topic when no output topic is mapped.
pub const DEFAULT_OUTPUT_SUFFIX: &str = "_diff";

/// Split a comma separated topic list, ignoring all whitespace.
///
/// An empty list yields no topics. Interior empty entries are kept so
/// positions line up with a parallel list.
#[must_use]
pub fn parse_topic_list(list: &str) -> Vec<String> {
    let compact: String = list.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Vec::new();
    }
    compact.split(',').map(str::to_owned).collect()
}

/// Pair every input topic with its output topic.
///
/// An output entry is used verbatim when present and non-empty, otherwise
/// the output is `<input>_diff`.
#[must_use]
pub fn map_output_topics(inputs: &[String], outputs: &[String]) -> Vec<(String, String)> {
    inputs
        .iter()
        .enumerate()
        .map(|(i, input)| {
            let output = match outputs.get(i) {
                Some(out) if !out.is_empty() => out.clone(),
                _ => format!("{input}{DEFAULT_OUTPUT_SUFFIX}"),
            };
            (input.clone(), output)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_whitespace_is_ignored() {
        assert_eq!(parse_topic_list(" a , b "), parse_topic_list("a,b"));
        assert_eq!(parse_topic_list("a,\tb\n"), list(&["a", "b"]));
    }

    #[test]
    fn test_empty_list_has_no_topics() {
        assert!(parse_topic_list("").is_empty());
        assert!(parse_topic_list("   ").is_empty());
    }

    #[test]
    fn test_interior_empty_entries_are_kept() {
        assert_eq!(parse_topic_list("x,,z"), list(&["x", "", "z"]));
    }

    #[test]
    fn test_output_mapping_with_gaps() {
        let mapped = map_output_topics(&list(&["a", "b", "c"]), &parse_topic_list("x,,z"));
        let outputs: Vec<_> = mapped.into_iter().map(|(_, out)| out).collect();
        assert_eq!(outputs, list(&["x", "b_diff", "z"]));
    }

    #[test]
    fn test_output_mapping_shorter_list() {
        let mapped = map_output_topics(&list(&["a", "b"]), &list(&["x"]));
        assert_eq!(
            mapped,
            vec![
                ("a".to_string(), "x".to_string()),
                ("b".to_string(), "b_diff".to_string()),
            ]
        );
    }
}
