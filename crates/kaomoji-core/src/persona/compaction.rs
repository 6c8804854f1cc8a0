//! Lossy summarization of raw experience entries into learned lessons.

use std::collections::HashMap;

use super::{EXPERIENCE_CAPACITY, LESSONS_PER_COMPACTION};

const GENERAL_TOPIC: &str = "general";

/// Topic of an experience entry: the text before the first `:`, or `general`
/// when there is no delimiter or the prefix is blank.
pub fn topic_of(entry: &str) -> &str {
    match entry.split_once(':') {
        Some((topic, _)) if !topic.trim().is_empty() => topic.trim(),
        _ => GENERAL_TOPIC,
    }
}

/// Summarizes the most recent [`EXPERIENCE_CAPACITY`] entries into at most
/// [`LESSONS_PER_COMPACTION`] lessons, one per topic bucket.
///
/// Buckets are ranked by member count, descending; ties keep first-seen order.
pub fn compact_experiences(entries: &[String]) -> Vec<String> {
    let start = entries.len().saturating_sub(EXPERIENCE_CAPACITY);
    let window = &entries[start..];

    let mut buckets: Vec<(&str, usize)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for entry in window {
        let topic = topic_of(entry);
        match index.get(topic) {
            Some(&i) => buckets[i].1 += 1,
            None => {
                index.insert(topic, buckets.len());
                buckets.push((topic, 1));
            }
        }
    }

    // sort_by is stable, so equal counts stay in first-seen order.
    buckets.sort_by(|a, b| b.1.cmp(&a.1));
    buckets
        .into_iter()
        .take(LESSONS_PER_COMPACTION)
        .map(|(topic, count)| {
            format!("Learned lesson: prioritize '{}' signals ({} events).", topic, count)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(groups: &[(&str, usize)]) -> Vec<String> {
        groups
            .iter()
            .flat_map(|(prefix, n)| (0..*n).map(move |i| format!("{}event-{}", prefix, i)))
            .collect()
    }

    #[test]
    fn topic_uses_prefix_before_first_colon() {
        assert_eq!(topic_of("verbosity: too long"), "verbosity");
        assert_eq!(topic_of("tone:a:b"), "tone");
        assert_eq!(topic_of("no delimiter here"), "general");
        assert_eq!(topic_of("  : blank topic"), "general");
    }

    #[test]
    fn larger_bucket_ranks_first() {
        let log = entries(&[("verbosity:", 30), ("tone:", 21)]);
        assert_eq!(log.len(), 51);

        let lessons = compact_experiences(&log);
        // The oldest verbosity entry falls outside the 50-entry window.
        assert_eq!(
            lessons,
            vec![
                "Learned lesson: prioritize 'verbosity' signals (29 events).".to_string(),
                "Learned lesson: prioritize 'tone' signals (21 events).".to_string(),
            ]
        );
    }

    #[test]
    fn ties_keep_first_seen_order_and_cap_at_five_buckets() {
        let log = entries(&[
            ("a:", 5),
            ("b:", 10),
            ("c:", 5),
            ("d:", 5),
            ("e:", 5),
            ("f:", 5),
            ("", 5),
        ]);
        let lessons = compact_experiences(&log);
        assert_eq!(lessons.len(), LESSONS_PER_COMPACTION);
        assert!(lessons[0].contains("'b'"));
        assert!(lessons[1].contains("'a'"));
        assert!(lessons[2].contains("'c'"));
        assert!(lessons[3].contains("'d'"));
        assert!(lessons[4].contains("'e'"));
    }

    #[test]
    fn undelimited_entries_bucket_as_general() {
        let log: Vec<String> = (0..3).map(|i| format!("entry-{}", i)).collect();
        assert_eq!(
            compact_experiences(&log),
            vec!["Learned lesson: prioritize 'general' signals (3 events).".to_string()]
        );
    }

    #[test]
    fn empty_input_yields_no_lessons() {
        assert!(compact_experiences(&[]).is_empty());
    }
}
