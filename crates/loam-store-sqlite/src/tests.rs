//! Integration tests for the POS store, the middleware store and the queue
//! against in-memory databases.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::{TimeZone, Utc};
use loam_core::{
  envelope,
  log::{ErrorHandler, Subsystem},
  mapping::{CustomerMapping, ImageMapping, MetafieldMapping, ProductMapping},
  model::{
    metafield::{CustomerField, MetafieldType, OwnerType, SpecField, Validation},
    order::{GiftCardDebit, PosDocument},
  },
  pos::{
    CustomerRow, DocumentPaymentRow, DocumentRow, GiftCardRow, ItemRow, NewCustomer,
    PromotionGroupRow, PromotionRuleRow, RuleItemRow,
  },
  queue::Broker,
};

use crate::{MiddlewareDb, PosDb, SqliteQueue, pos::PromotionRows};

fn errors() -> Arc<ErrorHandler> { Arc::new(ErrorHandler::new(Subsystem::Sync)) }

async fn pos() -> PosDb { PosDb::open_in_memory(errors()).await.expect("in-memory POS store") }

async fn middleware() -> MiddlewareDb {
  MiddlewareDb::open_in_memory(errors()).await.expect("in-memory middleware store")
}

fn at(hour: u32) -> chrono::DateTime<Utc> { Utc.with_ymd_and_hms(2026, 5, 1, hour, 0, 0).unwrap() }

fn item(item_no: &str, binding: Option<&str>, price: f64) -> ItemRow {
  ItemRow {
    item_no:       item_no.into(),
    binding_id:    binding.map(Into::into),
    parent_pin:    false,
    is_parent:     false,
    web_enabled:   true,
    web_visible:   true,
    active:        true,
    web_title:     Some(format!("Plant {item_no}")),
    descr:         format!("PLANT {item_no}"),
    long_descr:    None,
    html_descr:    Some("<p>Hardy.</p>".into()),
    price_1:       price,
    price_2:       None,
    sale_price:    None,
    cost:          price / 2.0,
    qty_available: 4,
    variant_name:  binding.map(|_| format!("{item_no} gal")),
    variant_size:  None,
    brand:         None,
    weight:        Some(2.5),
    categories:    vec!["SHRUBS".into()],
    specs:         BTreeMap::from([(SpecField::BotanicalName, "Ilex crenata".to_string())]),
    video_urls:    Vec::new(),
    last_maint:    at(9),
  }
}

fn customer(cust_no: &str, email: &str) -> CustomerRow {
  CustomerRow {
    cust_no:            cust_no.into(),
    first_name:         Some("Jane".into()),
    last_name:          Some("Doe".into()),
    email_1:            Some(email.into()),
    email_1_subscribed: true,
    email_2:            None,
    email_2_subscribed: false,
    mobile_1:           Some("828-123-4567".into()),
    sms_1_subscribed:   true,
    mobile_2:           None,
    sms_2_subscribed:   false,
    loyalty_points:     120,
    category:           "RETAIL".into(),
    birth_month:        Some(4),
    spouse_birth_month: None,
    wholesale_tier:     None,
    web_enabled:        true,
    address:            Default::default(),
    last_maint:         at(9),
  }
}

// ─── Access layer ────────────────────────────────────────────────────────────

#[tokio::test]
async fn query_answers_mapped_rows_and_counts() {
  let db = pos().await;
  db.put_item(&item("200373", None, 24.99)).await.into_result("seed").unwrap();

  let env = db
    .dal()
    .query("SELECT item_no, price_1 FROM items WHERE item_no = ?", vec!["200373".to_string().into()], true)
    .await;
  assert!(env.is_ok());
  let rows = env.rows();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0]["item_no"], "200373");

  let env = db
    .dal()
    .query("UPDATE items SET cost = 1 WHERE item_no = ?", vec!["200373".to_string().into()], false)
    .await;
  assert_eq!(env.count(), 1);
}

#[tokio::test]
async fn failed_query_is_logged_and_reported() {
  let handler = errors();
  let db = PosDb::open_in_memory(handler.clone()).await.unwrap();

  let env = db.dal().query("SELECT nope FROM nowhere", Vec::new(), true).await;
  assert!(!env.is_ok());
  assert_ne!(env.code, envelope::OK);
  assert!(env.message.contains("nowhere"));
  assert_eq!(handler.len(), 1);
}

// ─── Items ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn changed_bound_item_brings_its_family() {
  let db = pos().await;
  let mut small = item("B01-1", Some("B-01"), 19.99);
  let big = item("B01-3", Some("B-01"), 39.99);
  let lone = item("200373", None, 24.99);
  small.last_maint = at(12);
  for i in [&small, &big, &lone] {
    db.put_item(i).await.into_result("seed").unwrap();
  }

  let families = db.changed_families(at(10), &[]).await.unwrap();
  assert_eq!(families.len(), 1);
  let members: Vec<_> = families[0].iter().map(|i| i.item_no.as_str()).collect();
  assert_eq!(members, ["B01-1", "B01-3"]);
  assert_eq!(families[0][0].specs.get(&SpecField::BotanicalName).unwrap(), "Ilex crenata");
  assert_eq!(families[0][0].categories, ["SHRUBS"]);
}

#[tokio::test]
async fn retry_keys_are_reselected_after_the_cursor_moves() {
  let db = pos().await;
  db.put_item(&item("200373", None, 24.99)).await.into_result("seed").unwrap();
  db.put_item(&item("B01-1", Some("B-01"), 19.99)).await.into_result("seed").unwrap();

  assert!(db.changed_families(at(10), &[]).await.unwrap().is_empty());

  let retry = vec!["200373".to_string(), "B-01".to_string()];
  let families = db.changed_families(at(10), &retry).await.unwrap();
  assert_eq!(families.len(), 2);
}

#[tokio::test]
async fn set_parent_only_touches_rows_that_change() {
  let db = pos().await;
  db.put_item(&item("B01-1", Some("B-01"), 19.99)).await.into_result("seed").unwrap();
  db.put_item(&item("B01-3", Some("B-01"), 39.99)).await.into_result("seed").unwrap();

  assert_eq!(db.set_parent("B-01", "B01-1").await.count(), 1);
  assert_eq!(db.set_parent("B-01", "B01-1").await.count(), 0);
  assert_eq!(db.set_parent("B-01", "B01-3").await.count(), 2);

  let family = db.family("B-01").await.unwrap();
  assert!(!family[0].is_parent);
  assert!(family[1].is_parent);
}

#[tokio::test]
async fn sale_state_is_idempotent() {
  let db = pos().await;
  db.put_item(&item("200373", None, 24.99)).await.into_result("seed").unwrap();

  let env = db.set_sale("200373", Some(19.99), Some("Spring Sale".into())).await;
  assert_eq!(env.count(), 1);
  assert_eq!(db.set_sale("200373", Some(19.99), Some("Spring Sale".into())).await.count(), 0);
  assert!(db.on_sale_items().await.unwrap().contains("200373"));

  assert_eq!(db.set_sale("200373", None, None).await.count(), 1);
  assert!(db.on_sale_items().await.unwrap().is_empty());
}

// ─── Customers ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn new_customers_are_numbered_from_the_first_web_number() {
  let db = pos().await;
  let new = NewCustomer {
    first_name: "Jane".into(),
    last_name: "Doe".into(),
    email: Some("j@d.com".into()),
    category: "RETAIL".into(),
    ..Default::default()
  };
  let first = db.add_customer(&new).await.unwrap();
  let second = db.add_customer(&new).await.unwrap();
  assert_eq!(first, "100001");
  assert_eq!(second, "100002");
  assert_eq!(db.customers_by_email("J@D.com").await.unwrap(), [first, second]);
}

#[tokio::test]
async fn email_consent_updates_every_matching_slot_once() {
  let db = pos().await;
  let mut a = customer("1001", "j@d.com");
  a.email_2 = Some("other@d.com".into());
  let mut b = customer("1002", "x@d.com");
  b.email_2 = Some("j@d.com".into());
  b.email_2_subscribed = true;
  db.put_customer(&a).await.into_result("seed").unwrap();
  db.put_customer(&b).await.into_result("seed").unwrap();

  assert_eq!(db.set_email_subscription("j@d.com", false).await.count(), 2);
  assert_eq!(db.set_email_subscription("j@d.com", false).await.count(), 0);

  let a = db.customer("1001").await.unwrap().unwrap();
  assert!(!a.email_1_subscribed);
  assert!(a.last_maint > at(9));
  let changed = db.changed_customers(at(10), &[]).await.unwrap();
  assert_eq!(changed.len(), 2);
}

// ─── Promotions ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn rule_items_include_filtered_categories() {
  let db = pos().await;
  db.put_item(&item("200373", None, 24.99)).await.into_result("seed").unwrap();
  let mut other = item("300100", None, 9.99);
  other.categories = vec!["TOOLS".into()];
  db.put_item(&other).await.into_result("seed").unwrap();

  let rows = PromotionRows {
    group:  PromotionGroupRow {
      group_code: "SPRING".into(),
      descr:      "Spring Sale".into(),
      enabled:    true,
      begin_date: None,
      begin_time: 0,
      end_date:   None,
      end_time:   0,
      last_maint: at(9),
    },
    rules:  vec![PromotionRuleRow {
      group_code:      "SPRING".into(),
      rule_seq_no:     1,
      descr:           "Shrubs and one tool".into(),
      enabled:         true,
      customer_filter: None,
      item_filter:     Some("shrubs".into()),
      is_bogo:         false,
      bogo_buy_qty:    0,
      bogo_get_qty:    0,
      badge_suffix:    None,
      audience:        "R".into(),
    }],
    breaks: Vec::new(),
    items:  vec![RuleItemRow {
      group_code:  "SPRING".into(),
      rule_seq_no: 1,
      item_no:     "300100".into(),
      price_1:     0.0,
    }],
  };
  db.put_promotion(&rows).await.into_result("seed").unwrap();

  let promotions = db.promotions().await.unwrap();
  assert_eq!(promotions.len(), 1);
  let mut items: Vec<_> = promotions[0].items.iter().map(|i| i.item_no.clone()).collect();
  items.sort();
  assert_eq!(items, ["200373", "300100"]);
  assert!(promotions[0].items.iter().any(|i| i.price_1 == 9.99));
}

// ─── Documents ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn document_debits_never_go_negative() {
  let db = pos().await;
  db.put_customer(&customer("1001", "j@d.com")).await.into_result("seed").unwrap();
  db.put_gift_card(&GiftCardRow {
    gfc_no:      "GC-77".into(),
    balance:     10.0,
    orig_amount: 50.0,
    issued:      None,
    web_enabled: true,
    last_maint:  at(9),
  })
  .await
  .into_result("seed")
  .unwrap();

  let doc_id = db.next_document_id().await.unwrap();
  assert_eq!(doc_id, "1");
  let doc = PosDocument {
    header:         DocumentRow {
      doc_id:      doc_id.clone(),
      doc_type:    "T".into(),
      order_no:    Some("1042".into()),
      cust_no:     Some("1001".into()),
      status:      "open".into(),
      web_invoice: true,
      subtotal:    40.0,
      tax:         2.8,
      total:       42.8,
      created:     at(11),
      last_maint:  at(11),
    },
    lines:          Vec::new(),
    payments:       vec![DocumentPaymentRow {
      doc_id:       doc_id.clone(),
      pay_seq:      1,
      pay_code:     "GIFT".into(),
      amount:       15.0,
      gift_card_no: Some("GC-77".into()),
    }],
    discounts:      Vec::new(),
    gift_debits:    vec![GiftCardDebit { code: "GC-77".into(), amount: 15.0 }],
    loyalty_points: 500,
  };
  db.insert_document(&doc).await.into_result("insert").unwrap();

  assert_eq!(db.gift_card("GC-77").await.unwrap().unwrap().balance, 0.0);
  assert_eq!(db.customer("1001").await.unwrap().unwrap().loyalty_points, 0);
  assert_eq!(db.next_document_id().await.unwrap(), "2");

  let again = db.insert_document(&doc).await;
  assert!(!again.is_ok());
}

// ─── Middleware ──────────────────────────────────────────────────────────────

fn product(item_no: &str, binding: Option<&str>) -> ProductMapping {
  let mut row = ProductMapping::new(item_no);
  row.binding_id = binding.map(Into::into);
  row.product_id = Some("gid://shop/Product/1".into());
  row.variant_id = Some(format!("gid://shop/ProductVariant/{item_no}"));
  row.category_ids = vec!["11".into(), "12".into()];
  row.meta_ids.insert(SpecField::BotanicalName, "gid://shop/Metafield/9".into());
  row
}

#[tokio::test]
async fn product_rows_round_trip_with_metafield_ids() {
  let db = middleware().await;
  db.upsert_product(&product("200373", None)).await.into_result("upsert").unwrap();

  let rows = db.product_rows_for_key("200373").await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].category_ids, ["11", "12"]);
  assert_eq!(rows[0].meta_ids.get(&SpecField::BotanicalName).unwrap(), "gid://shop/Metafield/9");
  assert!(rows[0].id.is_some());
}

#[tokio::test]
async fn replacing_family_rows_drops_departed_variants() {
  let db = middleware().await;
  let family = vec![product("B01-1", Some("B-01")), product("B01-3", Some("B-01"))];
  db.replace_product_rows(Some("B-01".into()), family).await.into_result("seed").unwrap();

  db.replace_product_rows(Some("B-01".into()), vec![product("B01-1", Some("B-01"))])
    .await
    .into_result("shrink")
    .unwrap();
  let rows = db.product_rows_for_key("B-01").await.unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(rows[0].item_no, "B01-1");
}

#[tokio::test]
async fn deleting_a_product_removes_its_media() {
  let db = middleware().await;
  db.upsert_product(&product("200373", None)).await.into_result("seed").unwrap();
  let image = ImageMapping {
    id:               None,
    name:             "200373^1.jpg".into(),
    item_no:          Some("200373".into()),
    file_path:        "/photos/200373^1.jpg".into(),
    product_id:       None,
    image_id:         Some("gid://shop/MediaImage/4".into()),
    thumbnail:        true,
    image_number:     1,
    sort_order:       0,
    is_binding_image: false,
    binding_id:       None,
    is_variant_image: false,
    description:      None,
    size:             2048,
    modified:         at(8),
    last_maint:       at(9),
  };
  db.replace_media("gid://shop/Product/1", vec![image], Vec::new()).await.into_result("media").unwrap();
  let stored = db.images("gid://shop/Product/1").await.unwrap();
  assert_eq!(stored.len(), 1);
  assert_eq!(stored[0].modified, at(8));

  let env = db.delete_product("gid://shop/Product/1").await;
  assert_eq!(env.count(), 2);
  assert!(db.images("gid://shop/Product/1").await.unwrap().is_empty());
  assert!(db.product_rows().await.unwrap().is_empty());
}

#[tokio::test]
async fn customer_rows_keep_metafield_ids_per_field() {
  let db = middleware().await;
  let mut row = CustomerMapping::new("1001");
  row.shop_cust_id = Some("gid://shop/Customer/5".into());
  row.meta_ids.insert(CustomerField::LoyaltyPoints, "gid://shop/Metafield/30".into());
  row.loyalty_balance = 120;
  db.upsert_customer(&row).await.into_result("seed").unwrap();

  row.loyalty_balance = 80;
  db.upsert_customer(&row).await.into_result("update").unwrap();

  let found = db.customer_by_shop_id("gid://shop/Customer/5").await.unwrap().unwrap();
  assert_eq!(found.loyalty_balance, 80);
  assert_eq!(found.meta_ids.len(), 1);
  assert_eq!(db.customer_rows().await.unwrap().len(), 1);
}

#[tokio::test]
async fn retries_accumulate_attempts_until_cleared() {
  let db = middleware().await;
  assert!(db.cursor("products").await.unwrap().is_none());

  db.record_retry("products", "B-01", "throttled").await.into_result("retry").unwrap();
  db.record_retry("products", "B-01", "throttled").await.into_result("retry").unwrap();
  assert_eq!(db.retry_keys("products").await.unwrap(), ["B-01"]);
  let attempts = db.dal().query("SELECT attempts FROM sync_retries", Vec::new(), false).await;
  assert_eq!(attempts.rows()[0][0], 2);

  db.clear_retry("products", "B-01").await.into_result("clear").unwrap();
  assert!(db.retry_keys("products").await.unwrap().is_empty());

  db.set_cursor("products", at(10)).await.into_result("cursor").unwrap();
  assert_eq!(db.cursor("products").await.unwrap(), Some(at(10)));
}

#[tokio::test]
async fn metafield_definitions_store_their_validations() {
  let db = middleware().await;
  let def = MetafieldMapping {
    meta_id:     "gid://shop/MetafieldDefinition/1".into(),
    name:        "Height".into(),
    descr:       "Mature height".into(),
    namespace:   "specs".into(),
    key:         "height".into(),
    kind:        MetafieldType::SingleLineText,
    pinned:      true,
    pinned_pos:  Some(2),
    owner:       OwnerType::Product,
    validations: vec![Validation { name: "max".into(), value: "40".into(), kind: "int".into() }],
  };
  db.upsert_metafield_definition(&def).await.into_result("def").unwrap();
  assert_eq!(db.metafield_definitions().await.unwrap(), [def]);
}

// ─── Records ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn newsletter_events_follow_state_changes() {
  let db = middleware().await;
  assert_eq!(db.newsletter_status("j@d.com").await.unwrap(), None);

  assert_eq!(db.set_newsletter("j@d.com", true).await.count(), 1);
  assert_eq!(db.set_newsletter("j@d.com", true).await.count(), 0);
  db.set_newsletter("j@d.com", false).await.into_result("unsub").unwrap();
  db.set_newsletter("j@d.com", true).await.into_result("resub").unwrap();

  assert_eq!(db.newsletter_status("j@d.com").await.unwrap(), Some(true));
  assert_eq!(db.subscription_events("j@d.com").await.unwrap(), [
    "subscribe",
    "unsubscribe",
    "subscribe"
  ]);
}

#[tokio::test]
async fn stock_requests_are_matched_by_contact() {
  let db = middleware().await;
  db.add_stock_request("200373", Some("j@d.com"), None).await.into_result("add").unwrap();

  assert!(db.stock_request_exists("200373", Some("j@d.com"), None).await.unwrap());
  assert!(!db.stock_request_exists("200373", None, Some("828-123-4567")).await.unwrap());
  assert!(!db.stock_request_exists("300100", Some("j@d.com"), None).await.unwrap());

  let pending = db.stock_requests(vec!["200373".into()]).await.unwrap();
  assert_eq!(pending.len(), 1);
  db.delete_stock_requests(pending.iter().map(|r| r.id).collect()).await.into_result("del").unwrap();
  assert!(db.stock_requests(vec!["200373".into()]).await.unwrap().is_empty());
}

#[tokio::test]
async fn lead_steps_accumulate_as_a_bitmask() {
  let db = middleware().await;
  let steps = db.lead_steps("m-1", "Jane Doe", "j@d.com", "828-123-4567").await.unwrap();
  assert_eq!(steps, 0);
  db.mark_lead_step("m-1", 0b01).await.into_result("csv").unwrap();
  db.mark_lead_step("m-1", 0b10).await.into_result("sms").unwrap();
  db.mark_lead_step("m-1", 0b10).await.into_result("sms").unwrap();
  assert_eq!(db.lead_steps("m-1", "Jane Doe", "j@d.com", "828-123-4567").await.unwrap(), 0b11);
}

#[tokio::test]
async fn qr_visits_count_only_known_codes() {
  let db = middleware().await;
  db.put_qr_code("spring", "https://example.com/spring").await.into_result("qr").unwrap();

  assert_eq!(db.record_qr_visit("spring", Some("10.0.0.1"), Some("curl")).await.count(), 1);
  assert_eq!(db.record_qr_visit("missing", None, None).await.count(), 0);
  assert_eq!(
    db.qr_code("spring").await.unwrap(),
    Some(("https://example.com/spring".to_string(), 1))
  );
}

// ─── Queue ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn leased_messages_are_redelivered_after_nack() {
  let q = SqliteQueue::open_in_memory(errors()).await.unwrap();
  q.declare("design_leads").await.unwrap();
  q.declare("design_leads").await.unwrap();
  let id = q.publish("design_leads", r#"{"first_name":"Jane"}"#, true).await.unwrap();

  let first = q.receive("design_leads", Duration::from_secs(60)).await.unwrap().unwrap();
  assert_eq!(first.message_id, id);
  assert!(!first.redelivered);
  assert!(q.receive("design_leads", Duration::from_secs(60)).await.unwrap().is_none());

  q.nack(first.tag).await.unwrap();
  let second = q.receive("design_leads", Duration::from_secs(60)).await.unwrap().unwrap();
  assert!(second.redelivered);

  q.ack(second.tag).await.unwrap();
  assert_eq!(q.depth("design_leads").await.unwrap(), 0);
}

#[tokio::test]
async fn expired_lease_makes_a_message_visible_again() {
  let q = SqliteQueue::open_in_memory(errors()).await.unwrap();
  q.declare("design_leads").await.unwrap();
  q.publish("design_leads", "{}", true).await.unwrap();

  q.receive("design_leads", Duration::ZERO).await.unwrap().unwrap();
  let again = q.receive("design_leads", Duration::from_secs(60)).await.unwrap().unwrap();
  assert!(again.redelivered);
}

#[tokio::test]
async fn publishing_to_an_undeclared_queue_fails() {
  let q = SqliteQueue::open_in_memory(errors()).await.unwrap();
  assert!(q.publish("nowhere", "{}", true).await.is_err());
}
