//! Proptest generators for property-based testing.

use proptest::prelude::*;

use galleria_core::{
    CollectionType, CursorState, DetailRecord, ItemId, ItemSummary, PageToken,
};

/// Generate a numeric item id, as the site assigns them.
pub fn item_id() -> impl Strategy<Value = ItemId> {
    (1u64..10_000_000).prop_map(|n| ItemId::from(n.to_string()))
}

/// Generate a CollectionType.
pub fn collection_type() -> impl Strategy<Value = CollectionType> {
    prop_oneof![
        Just(CollectionType::Gallery),
        Just(CollectionType::Scraps),
        Just(CollectionType::Favorites),
        Just(CollectionType::Journals),
    ]
}

/// Generate a page token of either shape.
pub fn page_token() -> impl Strategy<Value = PageToken> {
    prop_oneof![
        (1u32..10_000).prop_map(PageToken::Number),
        "[0-9]{1,8}/next".prop_map(PageToken::Opaque),
    ]
}

/// Generate a cursor position.
pub fn cursor_state() -> impl Strategy<Value = CursorState> {
    (page_token(), 0usize..100, 1u32..10_000).prop_map(|(token, position, page_number)| {
        CursorState {
            token,
            position,
            page_number,
        }
    })
}

/// Generate a tag list, possibly with duplicates and stray whitespace.
pub fn tags() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[ ]?[a-z_]{1,12}[ ]?", 0..8)
}

/// Generate a detail record.
pub fn detail_record() -> impl Strategy<Value = DetailRecord> {
    (
        item_id(),
        "[a-z][a-z0-9_]{2,15}",
        "[A-Za-z0-9 ]{1,40}",
        "[A-Za-z0-9 .,\n]{0,200}",
        tags(),
        prop::option::of("[a-z0-9]{4,12}\\.(png|jpg|gif)"),
    )
        .prop_map(|(id, author, title, description, tags, file)| DetailRecord {
            id,
            author,
            title,
            description,
            tags,
            file_url: file.map(|f| format!("https://gallery.test/files/{}", f)),
            thumbnail_url: None,
            posted_at: None,
        })
}

/// Generate a listing entry with an optional surrogate.
pub fn item_summary() -> impl Strategy<Value = ItemSummary> {
    (item_id(), prop::option::of("r[0-9]{1,3}")).prop_map(|(id, surrogate)| {
        let summary = ItemSummary::new(id);
        match surrogate {
            Some(s) => summary.with_surrogate(s),
            None => summary,
        }
    })
}

/// Generate a gallery's ids, unique and newest first.
pub fn gallery_ids(max_len: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set(1u32..100_000, 0..=max_len).prop_map(|ids| {
        ids.into_iter()
            .rev()
            .map(|id| id.to_string())
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_revision_hash_ignores_tag_order(detail in detail_record()) {
            let mut shuffled = detail.clone();
            shuffled.tags.reverse();
            prop_assert_eq!(detail.revision_hash(), shuffled.revision_hash());
        }

        #[test]
        fn test_gallery_ids_are_descending(ids in gallery_ids(20)) {
            let numbers: Vec<u32> = ids.iter().map(|id| id.parse().unwrap()).collect();
            prop_assert!(numbers.windows(2).all(|w| w[0] > w[1]));
        }
    }
}
