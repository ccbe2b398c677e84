use chat_api::ConversationSummary;

/// Conversation summaries of the inbox, replaced wholesale on every fetch.
#[derive(Debug, Default, Clone)]
pub struct ConversationList {
    items: Vec<ConversationSummary>,
}

impl ConversationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, items: Vec<ConversationSummary>) {
        self.items = items;
    }

    /// Apply a `conversation_updated` event: the entry moves to the top.
    pub fn apply_update(&mut self, summary: ConversationSummary) {
        self.items.retain(|c| c.id != summary.id);
        self.items.insert(0, summary);
    }

    pub fn mark_read(&mut self, id: &str) {
        if let Some(c) = self.items.iter_mut().find(|c| c.id == id) {
            c.unread_count = 0;
        }
    }

    pub fn get(&self, id: &str) -> Option<&ConversationSummary> {
        self.items.iter().find(|c| c.id == id)
    }

    pub fn items(&self) -> &[ConversationSummary] {
        &self.items
    }

    pub fn total_unread(&self) -> u32 {
        self.items.iter().map(|c| c.unread_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_api::Peer;

    fn summary(id: &str, unread: u32) -> ConversationSummary {
        ConversationSummary {
            id: id.into(),
            peer: Peer {
                id: format!("peer-{id}"),
                name: "Minh".into(),
                avatar_url: None,
            },
            last_message: None,
            unread_count: unread,
        }
    }

    #[test]
    fn update_moves_to_top_and_replaces() {
        let mut list = ConversationList::new();
        list.replace(vec![summary("a", 1), summary("b", 2)]);
        list.apply_update(summary("b", 5));
        let ids: Vec<&str> = list.items().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(list.total_unread(), 6);
        list.apply_update(summary("c", 0));
        assert_eq!(list.items().len(), 3);
    }

    #[test]
    fn mark_read_resets_unread() {
        let mut list = ConversationList::new();
        list.replace(vec![summary("a", 3)]);
        list.mark_read("a");
        list.mark_read("missing");
        assert_eq!(list.get("a").unwrap().unread_count, 0);
    }
}
