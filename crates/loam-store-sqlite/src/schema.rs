//! SQL schemas for the POS store, the middleware store, and the lead queue.
//!
//! Each is executed once when a connection opens. Every statement is
//! idempotent thanks to `IF NOT EXISTS`.

/// The subset of the point-of-sale tables this system reads and writes.
pub const POS_SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS items (
    item_no          TEXT PRIMARY KEY,
    binding_id       TEXT,
    parent_pin       INTEGER NOT NULL DEFAULT 0,
    is_parent        INTEGER NOT NULL DEFAULT 0,
    web_enabled      INTEGER NOT NULL DEFAULT 0,
    web_visible      INTEGER NOT NULL DEFAULT 0,
    active           INTEGER NOT NULL DEFAULT 1,
    web_title        TEXT,
    descr            TEXT NOT NULL DEFAULT '',
    long_descr       TEXT,
    price_1          REAL NOT NULL DEFAULT 0,
    price_2          REAL,
    sale_price       REAL,
    cost             REAL NOT NULL DEFAULT 0,
    variant_name     TEXT,
    variant_size     TEXT,
    brand            TEXT,
    weight           REAL,
    video_urls       TEXT,            -- comma separated
    spec_botanical_name     TEXT,
    spec_plant_type         TEXT,
    spec_height             TEXT,
    spec_width              TEXT,
    spec_climate_zone       TEXT,
    spec_colors             TEXT,
    spec_size               TEXT,
    spec_bloom_season       TEXT,
    spec_bloom_color        TEXT,
    spec_light_requirements TEXT,
    spec_features           TEXT,
    spec_is_preorder        TEXT,
    spec_preorder_date      TEXT,
    spec_preorder_message   TEXT,
    spec_is_featured        TEXT,
    spec_in_store_only      TEXT,
    spec_is_on_sale         TEXT,
    spec_sale_description   TEXT,
    spec_is_new             TEXT,
    spec_is_back_in_stock   TEXT,
    last_maint       TEXT NOT NULL    -- RFC 3339 UTC
);

CREATE TABLE IF NOT EXISTS item_html (
    item_no TEXT PRIMARY KEY REFERENCES items(item_no),
    html    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS inventory (
    item_no       TEXT PRIMARY KEY REFERENCES items(item_no),
    qty_available INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS categories (
    code        TEXT PRIMARY KEY,
    parent_code TEXT,
    name        TEXT NOT NULL,
    description TEXT,
    sort        INTEGER NOT NULL DEFAULT 0,
    web_enabled INTEGER NOT NULL DEFAULT 0,
    visible     INTEGER NOT NULL DEFAULT 1,
    last_maint  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS item_categories (
    item_no  TEXT NOT NULL,
    category TEXT NOT NULL,
    seq      INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (item_no, category)
);

-- Brands are POS profile codes.
CREATE TABLE IF NOT EXISTS brands (
    code        TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    description TEXT,
    web_enabled INTEGER NOT NULL DEFAULT 0,
    last_maint  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS customers (
    cust_no            TEXT PRIMARY KEY,
    first_name         TEXT,
    last_name          TEXT,
    email_1            TEXT,
    email_1_subscribed INTEGER NOT NULL DEFAULT 0,
    email_2            TEXT,
    email_2_subscribed INTEGER NOT NULL DEFAULT 0,
    mobile_1           TEXT,
    sms_1_subscribed   INTEGER NOT NULL DEFAULT 0,
    mobile_2           TEXT,
    sms_2_subscribed   INTEGER NOT NULL DEFAULT 0,
    loyalty_points     INTEGER NOT NULL DEFAULT 0,
    category           TEXT NOT NULL DEFAULT 'RETAIL',
    birth_month        INTEGER,
    spouse_birth_month INTEGER,
    wholesale_tier     TEXT,
    web_enabled        INTEGER NOT NULL DEFAULT 1,
    company            TEXT,
    address_1          TEXT,
    address_2          TEXT,
    city               TEXT,
    state              TEXT,
    zip                TEXT,
    country            TEXT,
    phone              TEXT,
    last_maint         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS customer_ship_tos (
    cust_no    TEXT NOT NULL,
    ship_seq   INTEGER NOT NULL,
    first_name TEXT,
    last_name  TEXT,
    company    TEXT,
    address_1  TEXT,
    address_2  TEXT,
    city       TEXT,
    state      TEXT,
    zip        TEXT,
    country    TEXT,
    phone      TEXT,
    PRIMARY KEY (cust_no, ship_seq)
);

CREATE TABLE IF NOT EXISTS loyalty_history (
    entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
    cust_no  TEXT NOT NULL,
    doc_id   TEXT,
    points   INTEGER NOT NULL,
    reason   TEXT NOT NULL,
    at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS promotion_groups (
    group_code TEXT PRIMARY KEY,
    descr      TEXT NOT NULL DEFAULT '',
    enabled    INTEGER NOT NULL DEFAULT 0,
    begin_date TEXT,                  -- YYYY-MM-DD
    begin_time INTEGER NOT NULL DEFAULT 0,
    end_date   TEXT,
    end_time   INTEGER NOT NULL DEFAULT 0,
    last_maint TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS promotion_rules (
    group_code      TEXT NOT NULL,
    rule_seq_no     INTEGER NOT NULL,
    descr           TEXT NOT NULL DEFAULT '',
    enabled         INTEGER NOT NULL DEFAULT 0,
    customer_filter TEXT,
    item_filter     TEXT,             -- comma separated category codes
    is_bogo         INTEGER NOT NULL DEFAULT 0,
    bogo_buy_qty    INTEGER NOT NULL DEFAULT 0,
    bogo_get_qty    INTEGER NOT NULL DEFAULT 0,
    badge_suffix    TEXT,
    audience        TEXT NOT NULL DEFAULT 'RETAIL',
    PRIMARY KEY (group_code, rule_seq_no)
);

CREATE TABLE IF NOT EXISTS price_breaks (
    group_code  TEXT NOT NULL,
    rule_seq_no INTEGER NOT NULL,
    min_qty     REAL NOT NULL DEFAULT 1,
    method      TEXT NOT NULL,        -- D | P | A | F
    amount      REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS promotion_rule_items (
    group_code  TEXT NOT NULL,
    rule_seq_no INTEGER NOT NULL,
    item_no     TEXT NOT NULL,
    PRIMARY KEY (group_code, rule_seq_no, item_no)
);

CREATE TABLE IF NOT EXISTS documents (
    doc_id      TEXT PRIMARY KEY,
    doc_type    TEXT NOT NULL,        -- T (ticket) | H (hold)
    order_no    TEXT,
    cust_no     TEXT,
    status      TEXT NOT NULL,
    web_invoice INTEGER NOT NULL DEFAULT 0,
    subtotal    REAL NOT NULL DEFAULT 0,
    tax         REAL NOT NULL DEFAULT 0,
    total       REAL NOT NULL DEFAULT 0,
    created     TEXT NOT NULL,
    last_maint  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS document_lines (
    doc_id   TEXT NOT NULL,
    line_seq INTEGER NOT NULL,
    item_no  TEXT NOT NULL,
    descr    TEXT NOT NULL DEFAULT '',
    qty      REAL NOT NULL,
    price    REAL NOT NULL,
    PRIMARY KEY (doc_id, line_seq)
);

CREATE TABLE IF NOT EXISTS document_payments (
    doc_id       TEXT NOT NULL,
    pay_seq      INTEGER NOT NULL,
    pay_code     TEXT NOT NULL,
    amount       REAL NOT NULL,
    gift_card_no TEXT,
    PRIMARY KEY (doc_id, pay_seq)
);

CREATE TABLE IF NOT EXISTS document_discounts (
    doc_id   TEXT NOT NULL,
    disc_seq INTEGER NOT NULL,
    code     TEXT NOT NULL,
    amount   REAL NOT NULL,
    PRIMARY KEY (doc_id, disc_seq)
);

CREATE TABLE IF NOT EXISTS gift_cards (
    gfc_no      TEXT PRIMARY KEY,
    balance     REAL NOT NULL DEFAULT 0,
    orig_amount REAL NOT NULL DEFAULT 0,
    issued      TEXT,
    web_enabled INTEGER NOT NULL DEFAULT 1,
    last_maint  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS gift_card_activity (
    activity_id INTEGER PRIMARY KEY AUTOINCREMENT,
    gfc_no      TEXT NOT NULL,
    doc_id      TEXT NOT NULL,
    amount      REAL NOT NULL,
    reason      TEXT NOT NULL,
    at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS items_maint_idx     ON items(last_maint);
CREATE INDEX IF NOT EXISTS items_binding_idx   ON items(binding_id);
CREATE INDEX IF NOT EXISTS customers_maint_idx ON customers(last_maint);
CREATE INDEX IF NOT EXISTS customers_email_idx ON customers(email_1);
";

/// Tables owned by this system: identifier mappings, cursors, and the
/// auxiliary intake records.
pub const MIDDLEWARE_SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS collections (
    cp_id        TEXT PRIMARY KEY,
    shop_id      TEXT,
    menu_id      TEXT,
    parent_cp_id TEXT,
    name         TEXT NOT NULL,
    sort         INTEGER NOT NULL DEFAULT 0,
    description  TEXT,
    visible      INTEGER NOT NULL DEFAULT 1,
    image_size   INTEGER,
    is_brand     INTEGER NOT NULL DEFAULT 0,
    last_maint   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS products (
    id                     INTEGER PRIMARY KEY AUTOINCREMENT,
    item_no                TEXT NOT NULL UNIQUE,
    binding_id             TEXT,
    is_parent              INTEGER NOT NULL DEFAULT 0,
    product_id             TEXT,
    variant_id             TEXT,
    inventory_id           TEXT,
    variant_name           TEXT,
    option_id              TEXT,
    option_value_id        TEXT,
    category_ids           TEXT,      -- comma separated storefront ids
    meta_botanical_name_id     TEXT,
    meta_plant_type_id         TEXT,
    meta_height_id             TEXT,
    meta_width_id              TEXT,
    meta_climate_zone_id       TEXT,
    meta_colors_id             TEXT,
    meta_size_id               TEXT,
    meta_bloom_season_id       TEXT,
    meta_bloom_color_id        TEXT,
    meta_light_requirements_id TEXT,
    meta_features_id           TEXT,
    meta_is_preorder_id        TEXT,
    meta_preorder_date_id      TEXT,
    meta_preorder_message_id   TEXT,
    meta_is_featured_id        TEXT,
    meta_in_store_only_id      TEXT,
    meta_is_on_sale_id         TEXT,
    meta_sale_description_id   TEXT,
    meta_is_new_id             TEXT,
    meta_is_back_in_stock_id   TEXT,
    variant_size_meta_id   TEXT,
    payload_hash           TEXT,
    last_qty               INTEGER NOT NULL DEFAULT 0,
    last_maint             TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS images (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    name             TEXT NOT NULL,
    item_no          TEXT,
    file_path        TEXT NOT NULL,
    product_id       TEXT,
    image_id         TEXT,
    thumbnail        INTEGER NOT NULL DEFAULT 0,
    image_number     INTEGER NOT NULL DEFAULT 1,
    sort_order       INTEGER NOT NULL DEFAULT 0,
    is_binding_image INTEGER NOT NULL DEFAULT 0,
    binding_id       TEXT,
    is_variant_image INTEGER NOT NULL DEFAULT 0,
    description      TEXT,
    size             INTEGER NOT NULL DEFAULT 0,
    modified         TEXT NOT NULL DEFAULT '1970-01-01T00:00:00Z',
    last_maint       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS videos (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    url         TEXT NOT NULL,
    item_no     TEXT,
    product_id  TEXT,
    media_id    TEXT,
    sort_order  INTEGER NOT NULL DEFAULT 0,
    binding_id  TEXT,
    description TEXT,
    last_maint  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS customers (
    id                         INTEGER PRIMARY KEY AUTOINCREMENT,
    cp_cust_no                 TEXT NOT NULL UNIQUE,
    shop_cust_id               TEXT,
    store_credit_id            TEXT,
    meta_cust_no_id            TEXT,
    meta_loyalty_id            TEXT,
    meta_category_id           TEXT,
    meta_birth_month_id        TEXT,
    meta_spouse_birth_month_id TEXT,
    wholesale_price_tier_id    TEXT,
    loyalty_balance            INTEGER NOT NULL DEFAULT 0,
    payload_hash               TEXT,
    last_maint                 TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS orders (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    order_no TEXT NOT NULL UNIQUE,
    doc_id   TEXT NOT NULL,
    status   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS draft_orders (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    doc_id   TEXT NOT NULL UNIQUE,
    draft_id TEXT NOT NULL,
    created  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS gift_certificates (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    gfc_no      TEXT NOT NULL UNIQUE,
    shop_gfc_id TEXT NOT NULL,
    balance     REAL NOT NULL DEFAULT 0,
    last_maint  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS promotions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    group_code  TEXT NOT NULL,
    rule_seq_no INTEGER NOT NULL,
    shop_id     TEXT,
    enabled     INTEGER NOT NULL DEFAULT 0,
    last_maint  TEXT NOT NULL,
    UNIQUE (group_code, rule_seq_no)
);

CREATE TABLE IF NOT EXISTS promotion_lines_bogo (
    shop_id     TEXT NOT NULL,
    group_code  TEXT NOT NULL,
    rule_seq_no INTEGER NOT NULL,
    item_no     TEXT NOT NULL,
    PRIMARY KEY (shop_id, item_no)
);

CREATE TABLE IF NOT EXISTS promotion_lines_fixed (
    group_code  TEXT NOT NULL,
    rule_seq_no INTEGER NOT NULL,
    item_no     TEXT NOT NULL,
    PRIMARY KEY (group_code, rule_seq_no, item_no)
);

CREATE TABLE IF NOT EXISTS discounts (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    shop_id TEXT NOT NULL,
    disc_id TEXT NOT NULL,
    created TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS metafields (
    meta_id    TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    descr      TEXT NOT NULL DEFAULT '',
    namespace  TEXT NOT NULL,
    key        TEXT NOT NULL,
    type       TEXT NOT NULL,
    pinned     INTEGER NOT NULL DEFAULT 0,
    pinned_pos INTEGER,
    owner_type TEXT NOT NULL,
    validation_1_name  TEXT,
    validation_1_value TEXT,
    validation_1_type  TEXT,
    validation_2_name  TEXT,
    validation_2_value TEXT,
    validation_2_type  TEXT,
    validation_3_name  TEXT,
    validation_3_value TEXT,
    validation_3_type  TEXT,
    validation_4_name  TEXT,
    validation_4_value TEXT,
    validation_4_type  TEXT,
    validation_5_name  TEXT,
    validation_5_value TEXT,
    validation_5_type  TEXT,
    UNIQUE (owner_type, namespace, key)
);

CREATE TABLE IF NOT EXISTS webhooks (
    hook_id     TEXT PRIMARY KEY,
    topic       TEXT NOT NULL,
    destination TEXT NOT NULL,
    format      TEXT NOT NULL,
    domain      TEXT
);

CREATE TABLE IF NOT EXISTS sync_cursors (
    entity    TEXT PRIMARY KEY,
    last_sync TEXT NOT NULL
);

-- Entities that failed in a cycle; re-selected until they succeed.
CREATE TABLE IF NOT EXISTS sync_retries (
    entity       TEXT NOT NULL,
    key          TEXT NOT NULL,
    reason       TEXT NOT NULL,
    attempts     INTEGER NOT NULL DEFAULT 1,
    last_attempt TEXT NOT NULL,
    PRIMARY KEY (entity, key)
);

CREATE TABLE IF NOT EXISTS sms_history (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    direction   TEXT NOT NULL,        -- inbound | outbound
    phone       TEXT NOT NULL,
    body        TEXT NOT NULL,
    provider_id TEXT,
    at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sms_events (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    phone       TEXT,
    event       TEXT NOT NULL,
    provider_id TEXT,
    detail      TEXT,
    at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS newsletter (
    email      TEXT PRIMARY KEY,
    subscribed INTEGER NOT NULL DEFAULT 1,
    created    TEXT NOT NULL,
    updated    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS subscription_events (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL,
    event TEXT NOT NULL,              -- subscribe | unsubscribe
    at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS stock_notify (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    item_no TEXT NOT NULL,
    email   TEXT,
    phone   TEXT,
    created TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS design_leads (
    message_id TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    email      TEXT NOT NULL,
    phone      TEXT NOT NULL,
    steps      INTEGER NOT NULL DEFAULT 0,  -- bitmask of completed steps
    created    TEXT NOT NULL,
    updated    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS qr_codes (
    qr_id   TEXT PRIMARY KEY,
    target  TEXT NOT NULL,
    visits  INTEGER NOT NULL DEFAULT 0,
    created TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS qr_activity (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    qr_id      TEXT NOT NULL REFERENCES qr_codes(qr_id),
    remote_ip  TEXT,
    user_agent TEXT,
    at         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS products_binding_idx ON products(binding_id);
CREATE INDEX IF NOT EXISTS products_product_idx ON products(product_id);
CREATE INDEX IF NOT EXISTS images_product_idx   ON images(product_id);
CREATE INDEX IF NOT EXISTS stock_notify_item_idx ON stock_notify(item_no);
";

/// Messages of the durable queue.
pub const QUEUE_SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS queues (
    name    TEXT PRIMARY KEY,
    created TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    tag          INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id   TEXT NOT NULL UNIQUE,
    queue        TEXT NOT NULL REFERENCES queues(name),
    body         TEXT NOT NULL,
    persistent   INTEGER NOT NULL DEFAULT 1,
    deliveries   INTEGER NOT NULL DEFAULT 0,
    visible_at   TEXT NOT NULL,       -- leased until this instant
    published_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS messages_visible_idx ON messages(queue, visible_at);
";
