//! Session-local copy of the catalog, kept in display order.
//!
//! Categories and their links are ordered by `sort_order`; entries with equal
//! `sort_order` keep the order in which they were inserted.

use shared::domain::{Category, CategoryId, Link, LinkId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    categories: Vec<Category>,
}

impl Catalog {
    pub fn from_categories(mut categories: Vec<Category>) -> Self {
        categories.sort_by_key(|category| category.sort_order);
        for category in &mut categories {
            category.links.sort_by_key(|link| link.sort_order);
        }
        Self { categories }
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn category(&self, id: &CategoryId) -> Option<&Category> {
        self.categories.iter().find(|category| &category.id == id)
    }

    pub fn category_mut(&mut self, id: &CategoryId) -> Option<&mut Category> {
        self.categories.iter_mut().find(|category| &category.id == id)
    }

    pub fn link(&self, id: &LinkId) -> Option<&Link> {
        self.categories
            .iter()
            .flat_map(|category| category.links.iter())
            .find(|link| &link.id == id)
    }

    pub fn link_mut(&mut self, id: &LinkId) -> Option<&mut Link> {
        self.categories
            .iter_mut()
            .flat_map(|category| category.links.iter_mut())
            .find(|link| &link.id == id)
    }

    pub fn insert_category(&mut self, category: Category) {
        let at = ordered_position(&self.categories, category.sort_order, |c| c.sort_order);
        self.categories.insert(at, category);
    }

    /// Appends `link` to its owning category. Returns the link back if that
    /// category is not in the catalog.
    pub fn insert_link(&mut self, link: Link) -> Result<(), Link> {
        let Some(category) = self.category_mut(&link.category_id) else {
            return Err(link);
        };
        let at = ordered_position(&category.links, link.sort_order, |l| l.sort_order);
        category.links.insert(at, link);
        Ok(())
    }

    pub fn remove_category(&mut self, id: &CategoryId) -> Option<Category> {
        let index = self.categories.iter().position(|category| &category.id == id)?;
        Some(self.categories.remove(index))
    }

    pub fn remove_link(&mut self, id: &LinkId) -> Option<Link> {
        self.categories.iter_mut().find_map(|category| {
            let index = category.links.iter().position(|link| &link.id == id)?;
            Some(category.links.remove(index))
        })
    }

    pub fn reposition_category(&mut self, id: &CategoryId, sort_order: i64) -> bool {
        let Some(mut category) = self.remove_category(id) else {
            return false;
        };
        category.sort_order = sort_order;
        self.insert_category(category);
        true
    }

    pub fn reposition_link(&mut self, id: &LinkId, sort_order: i64) -> bool {
        let Some(mut link) = self.remove_link(id) else {
            return false;
        };
        link.sort_order = sort_order;
        self.insert_link(link).is_ok()
    }
}

fn ordered_position<T>(items: &[T], sort_order: i64, key: impl Fn(&T) -> i64) -> usize {
    items.partition_point(|item| key(item) <= sort_order)
}
