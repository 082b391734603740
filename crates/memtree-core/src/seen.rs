use dashmap::DashSet;

/// Request-scoped set of memory ids already placed in the result.
///
/// Shared by every task of one recall through an `Arc`. The only way to add
/// an id is [`SeenSet::claim`], a single atomic insert, so two tasks racing
/// for the same id can never both win.
#[derive(Debug, Default)]
pub struct SeenSet {
    ids: DashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set = Self::new();
        for id in ids {
            set.ids.insert(id.into());
        }
        set
    }

    /// Claim `id` for the result. Returns `true` if this call inserted it,
    /// `false` if some other caller got there first.
    pub fn claim(&self, id: &str) -> bool {
        self.ids.insert(id.to_owned())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
