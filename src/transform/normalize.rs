/// Normalize a source column name: lowercase, with spaces and hyphens mapped
/// to underscores. `"Order Date"` → `order_date`, `"Sub-Category"` →
/// `sub_category`.
pub fn normalize_column(name: &str) -> String {
    name.to_lowercase().replace(' ', "_").replace('-', "_")
}
