//! Conversation-side metrics aggregation

use crm_common::models::{ConversationMetrics, ConversationRecord};

/// Aggregate conversations last updated at or before `as_of`
pub fn aggregate_conversations(conversations: &[ConversationRecord], as_of: i64) -> ConversationMetrics {
    let mut m = ConversationMetrics::default();
    let mut latest: Option<&ConversationRecord> = None;

    for conv in conversations.iter().filter(|c| c.updated_at <= as_of) {
        m.conversation_count += 1;
        match conv.kind() {
            "COMMENT" => m.conversation_count_by_comment += 1,
            _ => m.conversation_count_by_inbox += 1,
        }
        m.total_messages += conv.message_count();
        m.conversation_from_ads |= conv.from_ads();

        let started = conv.started_at();
        if m.first_conversation_at == 0 || started < m.first_conversation_at {
            m.first_conversation_at = started;
        }
        if conv.updated_at > m.last_conversation_at {
            m.last_conversation_at = conv.updated_at;
        }
        if latest.map_or(true, |l| conv.updated_at > l.updated_at) {
            latest = Some(conv);
        }

        for tag in conv.tags() {
            if !m.conversation_tags.contains(&tag) {
                m.conversation_tags.push(tag);
            }
        }
    }

    m.conversation_tags.sort();
    m.has_conversation = m.conversation_count > 0;
    m.last_message_from_customer = latest.is_some_and(|c| c.last_sent_by_customer());
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conv(id: &str, updated_at: i64, extra: serde_json::Value) -> ConversationRecord {
        let mut doc = json!({"id": id, "customer_id": "m1", "updated_at": updated_at});
        if let (Some(obj), Some(extra)) = (doc.as_object_mut(), extra.as_object()) {
            obj.extend(extra.clone());
        }
        ConversationRecord::from_document("org", doc, 0).unwrap()
    }

    #[test]
    fn test_empty() {
        let m = aggregate_conversations(&[], i64::MAX);
        assert!(!m.has_conversation);
        assert_eq!(m.conversation_count, 0);
    }

    #[test]
    fn test_counts_tags_and_latest_sender() {
        let t1 = 1_700_000_000_000;
        let t2 = t1 + 1_000;
        let convs = vec![
            conv("c1", t1, json!({"type": "COMMENT", "message_count": 2, "tags": [{"text": "b"}],
                "last_sent_by": {"email": "x@facebook.com"}})),
            conv("c2", t2, json!({"message_count": 5, "ad_ids": ["ad"], "tags": [{"text": "a"}, {"text": "b"}],
                "last_sent_by": {"email": "staff@shop.vn"}})),
        ];
        let m = aggregate_conversations(&convs, i64::MAX);
        assert_eq!(m.conversation_count, 2);
        assert_eq!(m.conversation_count_by_comment, 1);
        assert_eq!(m.conversation_count_by_inbox, 1);
        assert_eq!(m.total_messages, 7);
        assert!(m.conversation_from_ads);
        assert_eq!(m.conversation_tags, vec!["a".to_string(), "b".to_string()]);
        assert!(!m.last_message_from_customer);
        assert_eq!(m.first_conversation_at, t1);
        assert_eq!(m.last_conversation_at, t2);
    }

    #[test]
    fn test_as_of_excludes_later_updates() {
        let t1 = 1_700_000_000_000;
        let convs = vec![
            conv("c1", t1, json!({"last_sent_by": {"email": "x@facebook.com"}})),
            conv("c2", t1 + 10, json!({})),
        ];
        let m = aggregate_conversations(&convs, t1);
        assert_eq!(m.conversation_count, 1);
        assert!(m.last_message_from_customer);
    }
}
