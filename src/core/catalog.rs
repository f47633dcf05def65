use crate::core::session::PortalSession;
use crate::domain::model::Order;
use crate::utils::error::Result;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

const NOT_YET_RENEWABLE_PHRASE: &str = "Contract extension possible from";

static ORDER_ROWS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        "#kc2_order_customer_orders_tab_content_1 .kc2_order_table.kc2_content_table tr",
    )
    .expect("valid order row selector")
});
static ORDER_ID_CELL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".td-z1-sp1-kc").expect("valid order id selector"));
static ACTION_CELL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".td-z1-sp2-kc .kc2_order_action_container")
        .expect("valid action cell selector")
});

/// Reads the order table off the authenticated account page.
pub struct OrderCatalog;

impl OrderCatalog {
    /// Orders in table order. An absent or empty table yields an empty list.
    pub async fn list_orders(session: &mut PortalSession) -> Result<Vec<Order>> {
        tracing::info!("Fetching order list...");
        let html = session.account_page().await?;
        let orders = Self::parse_orders(&html);
        tracing::info!("✅ Found {} orders", orders.len());
        Ok(orders)
    }

    pub fn parse_orders(html: &str) -> Vec<Order> {
        let document = Html::parse_document(html);
        let mut orders: Vec<Order> = Vec::new();

        for row in document.select(&ORDER_ROWS) {
            let Some(order) = Self::parse_row(row) else {
                continue;
            };

            match orders.iter_mut().find(|o| o.order_id == order.order_id) {
                Some(existing) => existing.renewable = order.renewable,
                None => orders.push(order),
            }
        }

        orders
    }

    /// Header and layout rows lack the single id cell and are skipped.
    fn parse_row(row: ElementRef<'_>) -> Option<Order> {
        let id_cells: Vec<ElementRef<'_>> = row.select(&ORDER_ID_CELL).collect();
        if id_cells.len() != 1 {
            return None;
        }

        let order_id = element_text(id_cells[0]).trim().to_string();
        if order_id.is_empty() {
            return None;
        }

        let Some(action) = row.select(&ACTION_CELL).next() else {
            tracing::debug!("Order {} has no action cell, skipping", order_id);
            return None;
        };

        let renewable = !element_text(action).contains(NOT_YET_RENEWABLE_PHRASE);
        Some(Order::new(order_id, renewable))
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>()
}
