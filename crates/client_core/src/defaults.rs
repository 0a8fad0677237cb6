use shared::domain::{Category, CategoryId, Link, LinkId, OpenMode};

fn link(category: &str, id: &str, name: &str, url: &str, open_mode: OpenMode) -> Link {
    Link {
        id: LinkId::from(id),
        category_id: CategoryId::from(category),
        name: name.to_string(),
        url: url.to_string(),
        open_mode,
        iframe_compatible: open_mode == OpenMode::App,
        sort_order: 0,
    }
}

pub fn default_catalog() -> Vec<Category> {
    vec![
        Category {
            id: CategoryId::from("1"),
            name: "Analytics".to_string(),
            expanded: true,
            sort_order: 0,
            links: vec![
                link("1", "1a", "Dashboard", "https://example.com/dashboard", OpenMode::App),
                link("1", "1b", "Reports", "https://example.com/reports", OpenMode::App),
            ],
        },
        Category {
            id: CategoryId::from("2"),
            name: "Partner Tools".to_string(),
            expanded: false,
            sort_order: 1,
            links: vec![link(
                "2",
                "2a",
                "White Label Portal",
                "https://partner.example.com",
                OpenMode::App,
            )],
        },
        Category {
            id: CategoryId::from("3"),
            name: "Internal Apps".to_string(),
            expanded: false,
            sort_order: 2,
            links: vec![
                link("3", "3a", "CRM", "https://crm.example.com", OpenMode::Tab),
                link("3", "3b", "Inventory", "https://inventory.example.com", OpenMode::App),
            ],
        },
    ]
}
