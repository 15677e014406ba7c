//! Built-in business-type templates shipped with the service.

use crate::params::ParamType;
use crate::template::TemplateDefinition;

const CUSTOMER_ANALYSIS: &str = r#"
    SELECT
        o.order_id,
        p.product_name,
        o.amount,
        o.purchase_date
    FROM
        orders o
    JOIN
        products p ON o.product_id = p.product_id
    WHERE
        o.customer_id = :customer_id
        AND o.purchase_date BETWEEN :start_date AND :end_date
    {% if product_category %}
        AND p.category = :product_category
    {% endif %}
    ORDER BY
        o.purchase_date DESC
"#;

const PRODUCT_PERFORMANCE: &str = r#"
    SELECT
        p.product_name,
        COUNT(o.order_id) AS order_count,
        SUM(o.amount) AS total_revenue
    FROM
        products p
    JOIN
        orders o ON p.product_id = o.product_id
    WHERE
        o.purchase_date BETWEEN :start_date AND :end_date
    {% if category_id %}
        AND p.category_id = :category_id
    {% endif %}
    GROUP BY
        p.product_id
    ORDER BY
        total_revenue DESC
    {% if limit %}
        LIMIT :limit
    {% endif %}
"#;

const CUSTOMER_SEGMENTATION: &str = r#"
    SELECT
        c.customer_id,
        c.customer_name,
        c.email,
        COUNT(o.order_id) AS total_orders,
        SUM(o.amount) AS total_spent,
        AVG(o.amount) AS avg_order_value,
        MAX(o.purchase_date) AS last_purchase_date
    FROM
        customers c
    LEFT JOIN
        orders o ON c.customer_id = o.customer_id
    WHERE
        o.purchase_date BETWEEN :start_date AND :end_date
    {% if customer_region %}
        AND c.region = :customer_region
    {% endif %}
    GROUP BY
        c.customer_id
    {% if min_orders %}
        HAVING COUNT(o.order_id) >= :min_orders
    {% endif %}
    ORDER BY
        total_spent DESC
"#;

const INVENTORY_STATUS: &str = r#"
    SELECT
        p.product_id,
        p.product_name,
        i.quantity_in_stock,
        i.reorder_level,
        s.supplier_name,
        p.unit_price,
        (i.quantity_in_stock * p.unit_price) AS inventory_value
    FROM
        products p
    JOIN
        inventory i ON p.product_id = i.product_id
    JOIN
        suppliers s ON p.supplier_id = s.supplier_id
    {% if low_stock_only %}
        WHERE i.quantity_in_stock <= i.reorder_level
    {% else %}
        WHERE 1=1
    {% endif %}
    {% if supplier_id %}
        AND p.supplier_id = :supplier_id
    {% endif %}
    {% if category_id %}
        AND p.category_id = :category_id
    {% endif %}
    ORDER BY
    {% if sort_by_stock %}
        i.quantity_in_stock ASC
    {% else %}
        p.product_name
    {% endif %}
"#;

/// Built-in definitions in registration order.
pub fn definitions() -> Vec<(&'static str, TemplateDefinition)> {
    use ParamType::*;

    vec![
        (
            "customer_analysis",
            TemplateDefinition::new(CUSTOMER_ANALYSIS)
                .with_description("Analyze customer order history")
                .with_required(["customer_id", "start_date", "end_date"])
                .with_optional(["product_category"])
                .with_type("customer_id", Integer)
                .with_type("start_date", Date)
                .with_type("end_date", Date)
                .with_type("product_category", String),
        ),
        (
            "product_performance",
            TemplateDefinition::new(PRODUCT_PERFORMANCE)
                .with_description("Analyze product sales performance")
                .with_required(["start_date", "end_date"])
                .with_optional(["category_id", "limit"])
                .with_type("start_date", Date)
                .with_type("end_date", Date)
                .with_type("category_id", Integer)
                .with_type("limit", Integer),
        ),
        (
            "customer_segmentation",
            TemplateDefinition::new(CUSTOMER_SEGMENTATION)
                .with_description("Segment customers based on purchase behavior")
                .with_required(["start_date", "end_date"])
                .with_optional(["customer_region", "min_orders"])
                .with_type("start_date", Date)
                .with_type("end_date", Date)
                .with_type("customer_region", String)
                .with_type("min_orders", Integer),
        ),
        (
            "inventory_status",
            TemplateDefinition::new(INVENTORY_STATUS)
                .with_description("Check inventory levels and value")
                .with_optional(["low_stock_only", "supplier_id", "category_id", "sort_by_stock"])
                .with_type("low_stock_only", Boolean)
                .with_type("supplier_id", Integer)
                .with_type("category_id", Integer)
                .with_type("sort_by_stock", Boolean),
        ),
    ]
}
