//! Sync cycles against in-memory stores and an in-process storefront.

use std::{
  collections::{BTreeMap, BTreeSet},
  fs,
  path::Path,
  sync::Arc,
};

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use loam_core::{
  log::{ErrorHandler, Subsystem},
  mapping::DraftOrderMapping,
  model::metafield::{MetafieldDefinition, OwnerType, SpecField},
  notify::{EmailMessage, Mailer, MediaStorage, SmsSender},
  pos::{
    CategoryRow, CustomerRow, GiftCardRow, ItemRow, PriceBreakRow, PromotionGroupRow,
    PromotionRuleRow, RuleItemRow,
  },
  remote::{RemoteError, Result as RemoteResult},
  storefront::*,
};
use loam_store_sqlite::{MiddlewareDb, PosDb, pos::PromotionRows};
use parking_lot::{Mutex, MutexGuard};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::{CycleReport, Dispatcher, Engine, Kind, Settings, SyncContext};

// ─── Fake storefront ─────────────────────────────────────────────────────────

/// Remote state plus the log of every mutating call, in order.
#[derive(Default)]
struct Remote {
  next_id:       u64,
  calls:         Vec<String>,
  products:      BTreeMap<String, ProductInput>,
  variants:      BTreeMap<String, (String, VariantInput)>,
  media:         BTreeMap<String, Vec<String>>,
  collections:   BTreeMap<String, CollectionInput>,
  members:       BTreeMap<String, BTreeSet<String>>,
  definitions:   Vec<(OwnerType, RemoteDefinition)>,
  known_emails:  BTreeMap<String, String>,
  customers:     BTreeMap<String, CustomerInput>,
  credit:        BTreeMap<String, StoreCredit>,
  discounts:     BTreeMap<String, bool>,
  gift_cards:    BTreeMap<String, (f64, bool)>,
  webhooks:      Vec<WebhookSubscription>,
  fail_variants: bool,
  /// SKU whose variant writes are rejected.
  fail_sku:      Option<String>,
}

impl Remote {
  fn id(&mut self, kind: &str) -> String {
    self.next_id += 1;
    format!("gid://{kind}/{}", self.next_id)
  }

  fn count(&self, call: &str) -> usize { self.calls.iter().filter(|c| *c == call).count() }
}

#[derive(Default)]
struct FakeStorefront {
  remote: Mutex<Remote>,
}

impl FakeStorefront {
  fn record(&self, call: &str) { self.remote.lock().calls.push(call.to_string()); }

  fn write(&self, call: &str) -> MutexGuard<'_, Remote> {
    let mut remote = self.remote.lock();
    remote.calls.push(call.to_string());
    remote
  }
}

impl Storefront for FakeStorefront {
  async fn create_collection(&self, input: &CollectionInput) -> RemoteResult<String> {
    let mut r = self.write("create_collection");
    let id = r.id("Collection");
    r.collections.insert(id.clone(), input.clone());
    Ok(id)
  }

  async fn update_collection(&self, id: &str, input: &CollectionInput) -> RemoteResult<()> {
    self.write("update_collection").collections.insert(id.into(), input.clone());
    Ok(())
  }

  async fn delete_collection(&self, id: &str) -> RemoteResult<()> {
    let mut r = self.write("delete_collection");
    r.collections.remove(id);
    r.members.remove(id);
    Ok(())
  }

  async fn add_to_collection(&self, collection_id: &str, product_ids: &[String]) -> RemoteResult<()> {
    let mut r = self.write("add_to_collection");
    r.members.entry(collection_id.into()).or_default().extend(product_ids.iter().cloned());
    Ok(())
  }

  async fn remove_from_collection(&self, collection_id: &str, product_ids: &[String]) -> RemoteResult<()> {
    let mut r = self.write("remove_from_collection");
    if let Some(members) = r.members.get_mut(collection_id) {
      members.retain(|p| !product_ids.contains(p));
    }
    Ok(())
  }

  async fn create_product(&self, input: &ProductInput) -> RemoteResult<ProductIds> {
    let mut r = self.write("create_product");
    let product_id = r.id("Product");
    let option_id = input.option_name.as_ref().map(|_| r.id("ProductOption"));
    r.products.insert(product_id.clone(), input.clone());
    Ok(ProductIds { product_id, option_id })
  }

  async fn update_product(&self, product_id: &str, input: &ProductInput) -> RemoteResult<()> {
    let mut r = self.write("update_product");
    if !r.products.contains_key(product_id) {
      return Err(RemoteError::NotFound { service: "storefront", what: product_id.into() });
    }
    r.products.insert(product_id.into(), input.clone());
    Ok(())
  }

  async fn delete_product(&self, product_id: &str) -> RemoteResult<()> {
    let mut r = self.write("delete_product");
    r.products.remove(product_id);
    r.variants.retain(|_, (pid, _)| pid != product_id);
    r.media.remove(product_id);
    Ok(())
  }

  async fn create_variant(&self, product_id: &str, input: &VariantInput) -> RemoteResult<VariantIds> {
    let mut r = self.write("create_variant");
    if r.fail_variants || r.fail_sku.as_deref() == Some(input.sku.as_str()) {
      return Err(RemoteError::validation("storefront", "variant rejected"));
    }
    let variant_id = r.id("ProductVariant");
    let inventory_id = Some(r.id("InventoryItem"));
    r.variants.insert(variant_id.clone(), (product_id.into(), input.clone()));
    Ok(VariantIds { variant_id, inventory_id, option_value_id: None })
  }

  async fn update_variant(&self, product_id: &str, variant_id: &str, input: &VariantInput) -> RemoteResult<()> {
    self.write("update_variant").variants.insert(variant_id.into(), (product_id.into(), input.clone()));
    Ok(())
  }

  async fn delete_variant(&self, _product_id: &str, variant_id: &str) -> RemoteResult<()> {
    self.write("delete_variant").variants.remove(variant_id);
    Ok(())
  }

  async fn set_inventory(&self, _inventory_id: &str, _quantity: i64) -> RemoteResult<()> {
    self.record("set_inventory");
    Ok(())
  }

  async fn create_media(&self, product_id: &str, media: &[MediaInput]) -> RemoteResult<Vec<String>> {
    let mut r = self.write("create_media");
    let ids: Vec<String> = media.iter().map(|_| r.id("MediaImage")).collect();
    r.media.entry(product_id.into()).or_default().extend(ids.iter().cloned());
    Ok(ids)
  }

  async fn delete_media(&self, product_id: &str, media_ids: &[String]) -> RemoteResult<()> {
    let mut r = self.write("delete_media");
    if let Some(media) = r.media.get_mut(product_id) {
      media.retain(|m| !media_ids.contains(m));
    }
    Ok(())
  }

  async fn reorder_media(&self, _product_id: &str, _moves: &[(String, u32)]) -> RemoteResult<()> {
    self.record("reorder_media");
    Ok(())
  }

  async fn set_metafields(&self, fields: &[MetafieldInput]) -> RemoteResult<Vec<MetafieldSet>> {
    let mut r = self.write("set_metafields");
    Ok(fields
      .iter()
      .map(|f| MetafieldSet { id: r.id("Metafield"), owner_id: f.owner_id.clone(), key: f.key.clone() })
      .collect())
  }

  async fn delete_metafields(&self, _fields: &[MetafieldRef]) -> RemoteResult<()> {
    self.record("delete_metafields");
    Ok(())
  }

  async fn list_metafield_definitions(&self, owner: OwnerType) -> RemoteResult<Vec<RemoteDefinition>> {
    let r = self.remote.lock();
    Ok(r.definitions.iter().filter(|(o, _)| *o == owner).map(|(_, d)| d.clone()).collect())
  }

  async fn create_metafield_definition(&self, definition: &MetafieldDefinition) -> RemoteResult<String> {
    let mut r = self.write("create_metafield_definition");
    let id = r.id("MetafieldDefinition");
    let remote = RemoteDefinition {
      id:        id.clone(),
      namespace: definition.namespace.clone(),
      key:       definition.key.clone(),
    };
    r.definitions.push((definition.owner, remote));
    Ok(id)
  }

  async fn find_customer_by_email(&self, email: &str) -> RemoteResult<Option<String>> {
    let r = self.remote.lock();
    Ok(r.known_emails.iter().find(|(e, _)| e.eq_ignore_ascii_case(email)).map(|(_, id)| id.clone()))
  }

  async fn find_customer_by_phone(&self, _phone: &str) -> RemoteResult<Option<String>> { Ok(None) }

  async fn create_customer(&self, input: &CustomerInput) -> RemoteResult<String> {
    let mut r = self.write("create_customer");
    let id = r.id("Customer");
    if let Some(email) = &input.email {
      r.known_emails.insert(email.clone(), id.clone());
    }
    r.customers.insert(id.clone(), input.clone());
    Ok(id)
  }

  async fn update_customer(&self, id: &str, input: &CustomerInput) -> RemoteResult<()> {
    self.write("update_customer").customers.insert(id.into(), input.clone());
    Ok(())
  }

  async fn delete_customers(&self, ids: &[String]) -> RemoteResult<()> {
    let mut r = self.write("delete_customers");
    for id in ids {
      r.customers.remove(id);
    }
    Ok(())
  }

  async fn store_credit(&self, customer_id: &str) -> RemoteResult<Option<StoreCredit>> {
    Ok(self.remote.lock().credit.get(customer_id).cloned())
  }

  async fn credit_store_credit(&self, customer_id: &str, amount: f64) -> RemoteResult<String> {
    let mut r = self.write("credit_store_credit");
    let account_id = match r.credit.get(customer_id) {
      Some(account) => account.account_id.clone(),
      None => r.id("StoreCreditAccount"),
    };
    let account = r
      .credit
      .entry(customer_id.into())
      .or_insert_with(|| StoreCredit { account_id: account_id.clone(), balance: 0.0 });
    account.balance += amount;
    Ok(account_id)
  }

  async fn debit_store_credit(&self, account_id: &str, amount: f64) -> RemoteResult<()> {
    let mut r = self.write("debit_store_credit");
    match r.credit.values_mut().find(|c| c.account_id == account_id) {
      Some(account) => {
        account.balance -= amount;
        Ok(())
      }
      None => Err(RemoteError::NotFound { service: "storefront", what: account_id.into() }),
    }
  }

  async fn create_basic_discount(&self, _input: &BasicDiscountInput) -> RemoteResult<String> {
    let mut r = self.write("create_basic_discount");
    let id = r.id("DiscountAutomaticNode");
    r.discounts.insert(id.clone(), true);
    Ok(id)
  }

  async fn update_basic_discount(&self, _id: &str, _input: &BasicDiscountInput) -> RemoteResult<()> {
    self.record("update_basic_discount");
    Ok(())
  }

  async fn create_bxgy_discount(&self, _input: &BxgyDiscountInput) -> RemoteResult<String> {
    let mut r = self.write("create_bxgy_discount");
    let id = r.id("DiscountAutomaticNode");
    r.discounts.insert(id.clone(), true);
    Ok(id)
  }

  async fn update_bxgy_discount(&self, _id: &str, _input: &BxgyDiscountInput) -> RemoteResult<()> {
    self.record("update_bxgy_discount");
    Ok(())
  }

  async fn set_discount_active(&self, id: &str, active: bool) -> RemoteResult<()> {
    self.write("set_discount_active").discounts.insert(id.into(), active);
    Ok(())
  }

  async fn delete_discount(&self, id: &str) -> RemoteResult<()> {
    self.write("delete_discount").discounts.remove(id);
    Ok(())
  }

  async fn create_gift_card(&self, input: &GiftCardInput) -> RemoteResult<String> {
    let mut r = self.write("create_gift_card");
    let id = r.id("GiftCard");
    let value = input.initial_value.parse().unwrap_or_default();
    r.gift_cards.insert(id.clone(), (value, true));
    Ok(id)
  }

  async fn adjust_gift_card(&self, id: &str, delta: f64) -> RemoteResult<()> {
    let mut r = self.write("adjust_gift_card");
    match r.gift_cards.get_mut(id) {
      Some((balance, _)) => {
        *balance += delta;
        Ok(())
      }
      None => Err(RemoteError::NotFound { service: "storefront", what: id.into() }),
    }
  }

  async fn deactivate_gift_card(&self, id: &str) -> RemoteResult<()> {
    let mut r = self.write("deactivate_gift_card");
    if let Some((_, active)) = r.gift_cards.get_mut(id) {
      *active = false;
    }
    Ok(())
  }

  async fn fulfill_order(&self, _order_id: &str) -> RemoteResult<()> {
    self.record("fulfill_order");
    Ok(())
  }

  async fn cancel_order(&self, _order_id: &str) -> RemoteResult<()> {
    self.record("cancel_order");
    Ok(())
  }

  async fn create_draft_order(&self, _input: &DraftOrderInput) -> RemoteResult<String> {
    let mut r = self.write("create_draft_order");
    Ok(r.id("DraftOrder"))
  }

  async fn delete_draft_order(&self, _id: &str) -> RemoteResult<()> {
    self.record("delete_draft_order");
    Ok(())
  }

  async fn list_webhooks(&self) -> RemoteResult<Vec<WebhookSubscription>> {
    Ok(self.remote.lock().webhooks.clone())
  }

  async fn create_webhook(&self, subscription: &WebhookSubscription) -> RemoteResult<String> {
    let mut r = self.write("create_webhook");
    let id = r.id("WebhookSubscription");
    r.webhooks.push(WebhookSubscription { id: Some(id.clone()), ..subscription.clone() });
    Ok(id)
  }

  async fn delete_webhook(&self, id: &str) -> RemoteResult<()> {
    self.write("delete_webhook").webhooks.retain(|w| w.id.as_deref() != Some(id));
    Ok(())
  }
}

// ─── Fake collaborators ──────────────────────────────────────────────────────

#[derive(Default)]
struct FakeStorage {
  uploaded: Mutex<Vec<String>>,
  deleted:  Mutex<Vec<String>>,
}

#[async_trait]
impl MediaStorage for FakeStorage {
  async fn upload(&self, _local: &Path, name: &str) -> RemoteResult<String> {
    self.uploaded.lock().push(name.to_string());
    Ok(format!("https://cdn.test/{name}"))
  }

  async fn delete(&self, name: &str) -> RemoteResult<()> {
    self.deleted.lock().push(name.to_string());
    Ok(())
  }
}

/// Records recipients of both mail and text messages.
#[derive(Default)]
struct Outbox {
  sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Mailer for Outbox {
  async fn send_email(&self, message: &EmailMessage) -> RemoteResult<String> {
    self.sent.lock().push(message.to.clone());
    Ok("mail-1".into())
  }
}

#[async_trait]
impl SmsSender for Outbox {
  async fn send_sms(&self, to: &str, _body: &str) -> RemoteResult<String> {
    self.sent.lock().push(to.to_string());
    Ok("SM1".into())
  }
}

// ─── Harness ─────────────────────────────────────────────────────────────────

struct Harness {
  engine:  Engine<FakeStorefront>,
  storage: Arc<FakeStorage>,
  dir:     TempDir,
}

impl Harness {
  async fn new() -> Self { Self::with_settings(|_| {}).await }

  async fn with_settings(adjust: impl FnOnce(&mut Settings)) -> Self {
    let dir = tempfile::tempdir().unwrap();
    let photos = dir.path().join("photos");
    let brand_logos = dir.path().join("brands");
    fs::create_dir_all(&photos).unwrap();
    fs::create_dir_all(&brand_logos).unwrap();
    let mut settings = Settings {
      photos,
      brand_logos,
      webhook_topics: Vec::new(),
      webhook_destination: String::new(),
      bogo_promotions: false,
      company_name: "Loam Nursery".into(),
    };
    adjust(&mut settings);

    let errors = Arc::new(ErrorHandler::new(Subsystem::Sync));
    let storage = Arc::new(FakeStorage::default());
    let ctx = SyncContext {
      pos: PosDb::open_in_memory(errors.clone()).await.unwrap(),
      middleware: MiddlewareDb::open_in_memory(errors.clone()).await.unwrap(),
      storefront: FakeStorefront::default(),
      storage: storage.clone(),
      mailer: Arc::new(Outbox::default()),
      sms: Arc::new(Outbox::default()),
      errors,
      settings,
    };
    let engine = Engine::new(ctx, Dispatcher::new(4, CancellationToken::new()));
    Self { engine, storage, dir }
  }

  fn ctx(&self) -> &SyncContext<FakeStorefront> { self.engine.context() }

  fn remote(&self) -> MutexGuard<'_, Remote> { self.ctx().storefront.remote.lock() }

  fn photo(&self, name: &str) { fs::write(self.dir.path().join("photos").join(name), b"jpeg").unwrap(); }

  async fn cycle(&self) -> CycleReport { self.engine.run_cycle(None).await }

  async fn put_item(&self, item: &ItemRow) { self.ctx().pos.put_item(item).await.into_result("seed").unwrap(); }
}

// ─── Fixtures ────────────────────────────────────────────────────────────────

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
    web_title:     Some(format!("Holly {item_no}")),
    descr:         format!("HOLLY {item_no}"),
    long_descr:    None,
    html_descr:    Some("<p>Evergreen.</p>".into()),
    price_1:       price,
    price_2:       None,
    sale_price:    None,
    cost:          price / 2.0,
    qty_available: 4,
    variant_name:  binding.map(|_| format!("{item_no} gal")),
    variant_size:  None,
    brand:         None,
    weight:        Some(2.5),
    categories:    vec!["TREES".into()],
    specs:         BTreeMap::from([(SpecField::BotanicalName, "Ilex opaca".to_string())]),
    video_urls:    Vec::new(),
    last_maint:    at(9),
  }
}

fn category(code: &str) -> CategoryRow {
  CategoryRow {
    code:        code.into(),
    parent_code: None,
    name:        code.to_lowercase(),
    description: None,
    sort:        1,
    web_enabled: true,
    visible:     true,
    last_maint:  at(9),
  }
}

fn customer(cust_no: &str, email: &str, points: i64) -> CustomerRow {
  CustomerRow {
    cust_no:            cust_no.into(),
    first_name:         Some("Jane".into()),
    last_name:          Some("Doe".into()),
    email_1:            Some(email.into()),
    email_1_subscribed: true,
    email_2:            None,
    email_2_subscribed: false,
    mobile_1:           None,
    sms_1_subscribed:   false,
    mobile_2:           None,
    sms_2_subscribed:   false,
    loyalty_points:     points,
    category:           "RETAIL".into(),
    birth_month:        None,
    spouse_birth_month: None,
    wholesale_tier:     None,
    web_enabled:        true,
    address:            Default::default(),
    last_maint:         at(9),
  }
}

fn gift_card(gfc_no: &str, balance: f64) -> GiftCardRow {
  GiftCardRow {
    gfc_no:      gfc_no.into(),
    balance,
    orig_amount: 50.0,
    issued:      None,
    web_enabled: true,
    last_maint:  at(9),
  }
}

/// `SUMMER` rule 1: 20% off the listed items.
fn summer(rule_enabled: bool, dates: Option<(NaiveDate, NaiveDate)>, items: &[(&str, f64)]) -> PromotionRows {
  PromotionRows {
    group:  PromotionGroupRow {
      group_code: "SUMMER".into(),
      descr:      "Summer sale".into(),
      enabled:    true,
      begin_date: dates.map(|(b, _)| b),
      begin_time: 0,
      end_date:   dates.map(|(_, e)| e),
      end_time:   0,
      last_maint: at(9),
    },
    rules:  vec![PromotionRuleRow {
      group_code:      "SUMMER".into(),
      rule_seq_no:     1,
      descr:           "R1".into(),
      enabled:         rule_enabled,
      customer_filter: None,
      item_filter:     None,
      is_bogo:         false,
      bogo_buy_qty:    0,
      bogo_get_qty:    0,
      badge_suffix:    None,
      audience:        "R".into(),
    }],
    breaks: vec![PriceBreakRow {
      group_code:  "SUMMER".into(),
      rule_seq_no: 1,
      min_qty:     1.0,
      method:      "D".into(),
      amount:      20.0,
    }],
    items:  items
      .iter()
      .map(|(item_no, price_1)| RuleItemRow {
        group_code:  "SUMMER".into(),
        rule_seq_no: 1,
        item_no:     item_no.to_string(),
        price_1:     *price_1,
      })
      .collect(),
  }
}

// ─── Products ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn new_single_item_is_created_with_its_image() {
  let h = Harness::new().await;
  for code in ["TREES", "EVERGREEN"] {
    h.ctx().pos.put_category(&category(code)).await.into_result("seed").unwrap();
  }
  let mut holly = item("200373", None, 29.99);
  holly.categories = vec!["TREES".into(), "EVERGREEN".into()];
  h.put_item(&holly).await;
  h.photo("200373.jpg");

  let report = h.cycle().await;
  assert!(report.aborted.is_empty(), "aborted: {:?}", report.aborted);
  assert_eq!(report.outcome(Kind::Products).unwrap().succeeded, ["200373"]);

  let rows = h.ctx().middleware.product_rows_for_key("200373").await.unwrap();
  assert_eq!(rows.len(), 1);
  let product_id = rows[0].product_id.clone().expect("product id recorded");
  assert!(rows[0].variant_id.is_some());
  assert_eq!(rows[0].category_ids.len(), 2);

  {
    let remote = h.remote();
    assert_eq!(remote.count("create_product"), 1);
    assert_eq!(remote.products[&product_id].status, ProductStatus::Active);
    assert_eq!(remote.members.values().filter(|m| m.contains(&product_id)).count(), 2);
    assert_eq!(remote.media[&product_id].len(), 1);
  }

  let images = h.ctx().middleware.images(&product_id).await.unwrap();
  assert_eq!(images.len(), 1);
  assert_eq!(images[0].sort_order, 0);
  assert!(images[0].thumbnail);
  assert_eq!(*h.storage.uploaded.lock(), ["200373.jpg"]);
}

#[tokio::test]
async fn item_without_images_is_a_hidden_draft() {
  let h = Harness::new().await;
  h.put_item(&item("200373", None, 29.99)).await;

  h.cycle().await;

  let remote = h.remote();
  let product = remote.products.values().next().expect("product created");
  assert_eq!(product.status, ProductStatus::Draft);
  assert!(!product.published);
  assert_eq!(remote.count("create_media"), 0);
}

#[tokio::test]
async fn cheaper_new_member_becomes_the_parent() {
  let h = Harness::new().await;
  h.put_item(&item("200371", Some("B0006"), 39.99)).await;
  h.put_item(&item("200372", Some("B0006"), 49.99)).await;
  h.photo("B0006.jpg");
  h.cycle().await;

  let before = h.ctx().middleware.product_rows_for_key("B0006").await.unwrap();
  assert_eq!(before.len(), 2);
  let product_id = before[0].product_id.clone().unwrap();
  let thumbnail = h.ctx().middleware.images(&product_id).await.unwrap()[0].image_id.clone();
  h.remote().calls.clear();

  let mut newcomer = item("200374", Some("B0006"), 19.99);
  newcomer.last_maint = Utc::now();
  h.put_item(&newcomer).await;
  let report = h.cycle().await;
  assert_eq!(report.outcome(Kind::Products).unwrap().succeeded, ["B0006"]);

  {
    let remote = h.remote();
    assert_eq!(remote.count("create_product"), 0);
    assert_eq!(remote.count("update_product"), 1);
    assert_eq!(remote.count("create_variant"), 1);
    assert_eq!(remote.count("create_media"), 0);
  }

  let rows = h.ctx().middleware.product_rows_for_key("B0006").await.unwrap();
  assert_eq!(rows.len(), 3);
  assert!(rows.iter().all(|r| r.product_id.as_deref() == Some(product_id.as_str())));
  let parents: Vec<_> = rows.iter().filter(|r| r.is_parent).map(|r| r.item_no.as_str()).collect();
  assert_eq!(parents, ["200374"]);

  let items = h.ctx().pos.items(vec!["200371".into(), "200374".into()]).await.unwrap();
  let flag = |no: &str| items.iter().find(|i| i.item_no == no).unwrap().is_parent;
  assert!(flag("200374"));
  assert!(!flag("200371"));

  let images = h.ctx().middleware.images(&product_id).await.unwrap();
  assert_eq!(images.len(), 1);
  assert!(images[0].thumbnail);
  assert_eq!(images[0].image_id, thumbnail);
}

#[tokio::test]
async fn half_created_family_is_rolled_back_and_retried() {
  let h = Harness::new().await;
  h.put_item(&item("200371", Some("B0006"), 39.99)).await;
  h.put_item(&item("200372", Some("B0006"), 49.99)).await;
  h.remote().fail_variants = true;

  let report = h.cycle().await;
  assert_eq!(report.outcome(Kind::Products).unwrap().failed, ["B0006"]);
  {
    let remote = h.remote();
    assert_eq!(remote.count("create_product"), 1);
    assert_eq!(remote.count("delete_product"), 1);
    assert!(remote.products.is_empty());
  }
  assert!(h.ctx().middleware.product_rows_for_key("B0006").await.unwrap().is_empty());
  assert_eq!(h.ctx().middleware.retry_keys("products").await.unwrap(), ["B0006"]);

  h.remote().fail_variants = false;
  let report = h.cycle().await;
  assert_eq!(report.outcome(Kind::Products).unwrap().succeeded, ["B0006"]);
  assert_eq!(h.ctx().middleware.product_rows_for_key("B0006").await.unwrap().len(), 2);
  assert!(h.ctx().middleware.retry_keys("products").await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_growth_of_a_family_leaves_no_duplicate_variants() {
  let h = Harness::new().await;
  h.put_item(&item("200371", Some("B0006"), 39.99)).await;
  h.put_item(&item("200372", Some("B0006"), 49.99)).await;
  h.cycle().await;
  let product_id = h.ctx().middleware.product_rows_for_key("B0006").await.unwrap()[0].product_id.clone().unwrap();

  for (no, price) in [("200373", 59.99), ("200374", 69.99)] {
    let mut newcomer = item(no, Some("B0006"), price);
    newcomer.last_maint = Utc::now();
    h.put_item(&newcomer).await;
  }
  h.remote().fail_sku = Some("200374".into());
  let report = h.cycle().await;
  assert_eq!(report.outcome(Kind::Products).unwrap().failed, ["B0006"]);
  {
    let remote = h.remote();
    assert_eq!(remote.count("delete_product"), 0);
    assert_eq!(remote.count("delete_variant"), 1);
    assert!(remote.variants.values().all(|(_, v)| v.sku != "200373"));
  }
  assert_eq!(h.ctx().middleware.product_rows_for_key("B0006").await.unwrap().len(), 2);

  h.remote().fail_sku = None;
  let report = h.cycle().await;
  assert_eq!(report.outcome(Kind::Products).unwrap().succeeded, ["B0006"]);
  let remote = h.remote();
  let skus: Vec<&str> = remote.variants.values().map(|(_, v)| v.sku.as_str()).collect();
  assert_eq!(skus.iter().filter(|sku| **sku == "200373").count(), 1);
  assert_eq!(skus.len(), 4);
  assert!(remote.variants.values().all(|(pid, _)| *pid == product_id));
  drop(remote);
  assert_eq!(h.ctx().middleware.product_rows_for_key("B0006").await.unwrap().len(), 4);
  assert!(h.ctx().middleware.retry_keys("products").await.unwrap().is_empty());
}

#[tokio::test]
async fn rewritten_photo_of_the_same_size_is_uploaded_again() {
  let h = Harness::new().await;
  h.put_item(&item("200373", None, 29.99)).await;
  h.photo("200373.jpg");
  h.cycle().await;
  assert_eq!(h.remote().count("create_media"), 1);

  let path = h.dir.path().join("photos").join("200373.jpg");
  fs::write(&path, b"JPEG").unwrap();
  let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
  fs::File::options().write(true).open(&path).unwrap().set_modified(later).unwrap();
  let mut touched = item("200373", None, 29.99);
  touched.last_maint = Utc::now();
  h.put_item(&touched).await;

  let report = h.cycle().await;
  assert_eq!(report.outcome(Kind::Products).unwrap().succeeded, ["200373"]);
  assert_eq!(h.remote().count("create_media"), 2);
  assert_eq!(h.storage.deleted.lock().as_slice(), ["200373.jpg"]);
}

#[tokio::test]
async fn vanished_item_takes_its_product_and_images_down() {
  let h = Harness::new().await;
  h.put_item(&item("200373", None, 29.99)).await;
  h.photo("200373.jpg");
  h.cycle().await;

  let mut gone = item("200373", None, 29.99);
  gone.web_enabled = false;
  gone.last_maint = Utc::now();
  h.put_item(&gone).await;
  h.cycle().await;

  assert!(h.remote().products.is_empty());
  assert!(h.ctx().middleware.product_rows().await.unwrap().is_empty());
  assert_eq!(*h.storage.deleted.lock(), ["200373.jpg"]);
}

// ─── Idempotence ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn unchanged_pos_state_writes_nothing() {
  let h = Harness::new().await;
  h.ctx().pos.put_category(&category("TREES")).await.into_result("seed").unwrap();
  h.put_item(&item("200373", None, 29.99)).await;
  h.photo("200373.jpg");
  h.ctx().pos.put_customer(&customer("C100", "jane@example.com", 40)).await.into_result("seed").unwrap();
  h.ctx().pos.put_gift_card(&gift_card("GC1001", 50.0)).await.into_result("seed").unwrap();

  let first = h.cycle().await;
  assert!(first.aborted.is_empty());
  assert!(h.remote().count("create_metafield_definition") > 0);
  h.remote().calls.clear();

  let second = h.cycle().await;
  assert!(second.aborted.is_empty());
  assert_eq!(h.remote().calls, Vec::<String>::new());
}

// ─── Promotions ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn disabled_rule_deactivates_its_discount_and_clears_the_sale() {
  let h = Harness::new().await;
  h.put_item(&item("200373", None, 24.99)).await;
  h.photo("200373.jpg");
  h.ctx().pos.put_promotion(&summer(true, None, &[("200373", 24.99)])).await.into_result("seed").unwrap();

  h.cycle().await;
  let discount_id = {
    let remote = h.remote();
    assert_eq!(remote.count("create_basic_discount"), 1);
    remote.discounts.keys().next().cloned().unwrap()
  };
  let on_sale = h.ctx().pos.items(vec!["200373".into()]).await.unwrap().remove(0);
  assert_eq!(on_sale.sale_price, Some(19.99));
  assert!(on_sale.is_on_sale());
  assert_eq!(h.ctx().middleware.fixed_lines().await.unwrap().len(), 1);

  let mut disabled = summer(false, None, &[("200373", 24.99)]);
  disabled.group.last_maint = Utc::now();
  h.ctx().pos.put_promotion(&disabled).await.into_result("seed").unwrap();
  h.cycle().await;

  assert_eq!(h.remote().discounts.get(&discount_id), Some(&false));
  let off_sale = h.ctx().pos.items(vec!["200373".into()]).await.unwrap().remove(0);
  assert_eq!(off_sale.sale_price, None);
  assert!(!off_sale.is_on_sale());
  assert!(h.ctx().middleware.fixed_lines().await.unwrap().is_empty());
  let mapping = h.ctx().middleware.promotion_rows().await.unwrap();
  assert_eq!(mapping.len(), 1);
  assert!(!mapping[0].enabled);
}

#[tokio::test]
async fn promotion_ending_before_it_begins_touches_nothing() {
  let h = Harness::new().await;
  h.put_item(&item("200373", None, 24.99)).await;
  let begin = NaiveDate::from_ymd_opt(2026, 6, 10).unwrap();
  let end = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
  h.ctx()
    .pos
    .put_promotion(&summer(true, Some((begin, end)), &[("200373", 24.99)]))
    .await
    .into_result("seed")
    .unwrap();

  let report = h.cycle().await;
  assert_eq!(report.outcome(Kind::Promotions).unwrap().failed, ["SUMMER"]);
  assert!(h.remote().discounts.is_empty());
  assert!(h.ctx().pos.on_sale_items().await.unwrap().is_empty());
}

// ─── Customers ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn customer_is_adopted_by_email_and_loyalty_converges() {
  let h = Harness::new().await;
  {
    let mut remote = h.remote();
    remote.known_emails.insert("Jane@Example.com".into(), "gid://Customer/77".into());
    remote.credit.insert("gid://Customer/77".into(), StoreCredit {
      account_id: "gid://StoreCreditAccount/5".into(),
      balance:    100.0,
    });
  }
  h.ctx().pos.put_customer(&customer("C100", "jane@example.com", 120)).await.into_result("seed").unwrap();

  h.cycle().await;
  {
    let remote = h.remote();
    assert_eq!(remote.count("create_customer"), 0);
    assert_eq!(remote.count("update_customer"), 1);
    assert_eq!(remote.credit["gid://Customer/77"].balance, 120.0);
  }
  let row = h.ctx().middleware.customer_row("C100").await.unwrap().unwrap();
  assert_eq!(row.shop_cust_id.as_deref(), Some("gid://Customer/77"));
  assert_eq!(row.store_credit_id.as_deref(), Some("gid://StoreCreditAccount/5"));
  assert_eq!(row.loyalty_balance, 120);

  let mut spent = customer("C100", "jane@example.com", 90);
  spent.last_maint = Utc::now();
  h.ctx().pos.put_customer(&spent).await.into_result("seed").unwrap();
  h.cycle().await;

  let remote = h.remote();
  assert_eq!(remote.count("debit_store_credit"), 1);
  assert_eq!(remote.credit["gid://Customer/77"].balance, 90.0);
}

// ─── Gift cards ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn gift_card_follows_its_pos_balance() {
  let h = Harness::new().await;
  let pos = &h.ctx().pos;
  pos.put_gift_card(&gift_card("GC1001", 50.0)).await.into_result("seed").unwrap();

  h.engine.run_cycle(Some(Kind::GiftCards)).await;
  let card_id = {
    let remote = h.remote();
    let (id, (balance, active)) = remote.gift_cards.iter().next().unwrap();
    assert_eq!((*balance, *active), (50.0, true));
    id.clone()
  };

  pos.put_gift_card(&gift_card("GC1001", 35.0)).await.into_result("seed").unwrap();
  h.engine.run_cycle(Some(Kind::GiftCards)).await;
  assert_eq!(h.remote().gift_cards[&card_id], (35.0, true));
  assert_eq!(h.ctx().middleware.gift_certificates().await.unwrap()[0].balance, 35.0);

  pos.put_gift_card(&gift_card("GC1001", 0.0)).await.into_result("seed").unwrap();
  h.engine.run_cycle(Some(Kind::GiftCards)).await;
  assert_eq!(h.remote().gift_cards[&card_id], (35.0, false));
  assert!(h.ctx().middleware.gift_certificates().await.unwrap().is_empty());
}

// ─── Orders & webhooks ───────────────────────────────────────────────────────

#[tokio::test]
async fn released_hold_deletes_its_draft() {
  let h = Harness::new().await;
  let draft = DraftOrderMapping {
    id:       None,
    doc_id:   "D100".into(),
    draft_id: "gid://DraftOrder/9".into(),
    created:  at(9),
  };
  h.ctx().middleware.insert_draft(&draft).await.into_result("seed").unwrap();

  let report = h.engine.run_cycle(Some(Kind::Orders)).await;
  assert_eq!(report.outcome(Kind::Orders).unwrap().succeeded, ["D100"]);
  assert_eq!(h.remote().count("delete_draft_order"), 1);
  assert!(h.ctx().middleware.drafts().await.unwrap().is_empty());
}

#[tokio::test]
async fn webhooks_converge_on_the_configured_topics() {
  const DEST: &str = "https://hooks.example.com/webhooks/storefront";
  let h = Harness::with_settings(|s| {
    s.webhook_destination = DEST.into();
    s.webhook_topics = vec!["orders/create".into(), "customers/update".into()];
  })
  .await;
  {
    let subscription = |id: &str, topic: &str| WebhookSubscription {
      id:          Some(id.into()),
      topic:       topic.into(),
      destination: DEST.into(),
      format:      "json".into(),
    };
    let mut remote = h.remote();
    remote.webhooks.push(subscription("gid://WebhookSubscription/1", "orders/create"));
    remote.webhooks.push(subscription("gid://WebhookSubscription/2", "products/delete"));
  }

  h.engine.run_cycle(Some(Kind::Webhooks)).await;

  let topics: BTreeSet<String> = h.remote().webhooks.iter().map(|w| w.topic.clone()).collect();
  assert_eq!(topics, BTreeSet::from(["orders/create".to_string(), "customers/update".to_string()]));
  let rows = h.ctx().middleware.webhooks().await.unwrap();
  assert_eq!(rows.len(), 2);
  assert!(rows.iter().all(|r| r.domain.as_deref() == Some("hooks.example.com")));

  h.remote().calls.clear();
  h.engine.run_cycle(Some(Kind::Webhooks)).await;
  assert!(h.remote().calls.is_empty());
}
