//! Prefetch and retention policy

/// Fetch priority around `current_page`: the page itself, then forward
/// neighbours, then backward ones, clipped to the document.
pub fn preload_order(current_page: u32, preload_range: u32, page_count: u32) -> Vec<u32> {
    if page_count == 0 || current_page == 0 || current_page > page_count {
        return Vec::new();
    }

    let forward = (1..=preload_range)
        .filter_map(|offset| current_page.checked_add(offset))
        .take_while(|&page| page <= page_count);
    let backward = (1..=preload_range)
        .filter_map(|offset| current_page.checked_sub(offset))
        .take_while(|&page| page >= 1);

    std::iter::once(current_page)
        .chain(forward)
        .chain(backward)
        .collect()
}

/// True when `page` is far enough from `current_page` to be pruned
pub fn is_distant(page: u32, current_page: u32, retain_distance: u32) -> bool {
    page.abs_diff(current_page) > retain_distance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_before_backward() {
        assert_eq!(preload_order(10, 2, 20), vec![10, 11, 12, 9, 8]);
    }

    #[test]
    fn test_clipped_at_edges() {
        assert_eq!(preload_order(1, 2, 20), vec![1, 2, 3]);
        assert_eq!(preload_order(20, 2, 20), vec![20, 19, 18]);
        assert_eq!(preload_order(2, 3, 3), vec![2, 3, 1]);
        assert_eq!(preload_order(1, 0, 5), vec![1]);
    }

    #[test]
    fn test_out_of_range_current_page() {
        assert!(preload_order(0, 2, 20).is_empty());
        assert!(preload_order(21, 2, 20).is_empty());
        assert!(preload_order(1, 2, 0).is_empty());
    }

    #[test]
    fn test_retention_window() {
        assert!(!is_distant(3, 10, 7));
        assert!(!is_distant(17, 10, 7));
        assert!(is_distant(2, 10, 7));
        assert!(is_distant(18, 10, 7));
    }
}
