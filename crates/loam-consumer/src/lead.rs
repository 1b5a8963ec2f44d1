//! Side effects of one design lead.
//!
//! Each step is recorded in the lead's completed-steps bitmask as soon as it
//! succeeds, so a redelivered message resumes where the last attempt failed
//! instead of texting staff or emailing the customer twice.

use std::{path::PathBuf, sync::Arc};

use loam_core::{
  config::{CompanyConfig, Config},
  log::ErrorHandler,
  notify::{DocumentPrinter, EmailMessage, Mailer, SmsSender, SpreadsheetSink, render},
  pos::{AddressRow, NewCustomer},
  queue::{Delivery, LeadForm},
  sanitize::non_empty,
};
use loam_store_sqlite::{MiddlewareDb, PosDb, SmsDirection};
use serde_json::json;

use crate::{Result, csv, error::persisted};

// ─── Steps ───────────────────────────────────────────────────────────────────

/// One side effect, as a bit in the completed-steps mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
  Log,
  StaffSms,
  CustomerEmail,
  Print,
  Spreadsheet,
  PosCustomer,
}

impl Step {
  pub const ALL: [Step; 6] =
    [Step::Log, Step::StaffSms, Step::CustomerEmail, Step::Print, Step::Spreadsheet, Step::PosCustomer];

  pub fn bit(self) -> u32 { 1 << self as u32 }

  pub fn name(self) -> &'static str {
    match self {
      Step::Log => "csv",
      Step::StaffSms => "staff_sms",
      Step::CustomerEmail => "customer_email",
      Step::Print => "print",
      Step::Spreadsheet => "spreadsheet",
      Step::PosCustomer => "pos_customer",
    }
  }

  pub fn done(self, mask: u32) -> bool { mask & self.bit() != 0 }
}

// ─── Settings ────────────────────────────────────────────────────────────────

pub const TEMPLATE_FILE: &str = "design_lead.html";

const STAFF_SMS: &str = "New design lead: {{name}}, {{phone}}, {{email}}. Interested in: {{interests}}. \
                         Timeline: {{timeline}}.";
const CONFIRM_SUBJECT: &str = "We received your design request";
const CONFIRM_BODY: &str = "<p>Hi {{first_name}},</p><p>Thank you for contacting {{company}} about \
                            {{interests}}. A member of our design team will reach out within two business \
                            days.</p><p>{{company}}<br>{{company_phone}}<br>{{website}}</p>";
const PRINT_TEMPLATE: &str = "<html><body><h1>Design lead</h1><p>{{submitted_at}} ({{source}})</p>\
                              <p><strong>{{name}}</strong><br>{{phone}}<br>{{email}}</p>\
                              <p>{{street}}<br>{{city}}, {{state}} {{zip_code}}</p>\
                              <p>Interested in: {{interests}}<br>Timeline: {{timeline}}</p>\
                              <p>{{comments}}</p></body></html>";

#[derive(Debug, Clone)]
pub struct Settings {
  pub leads_csv:     PathBuf,
  pub templates:     PathBuf,
  pub staff_numbers: Vec<String>,
  pub staff_address: String,
  pub company:       CompanyConfig,
  /// POS category given to customers created from leads.
  pub category:      String,
}

impl Settings {
  pub fn from_config(cfg: &Config) -> Self {
    Self {
      leads_csv:     cfg.paths.leads_csv.clone(),
      templates:     cfg.paths.templates.clone(),
      staff_numbers: cfg.sms.staff_numbers.clone(),
      staff_address: cfg.email.staff_address.clone(),
      company:       cfg.company.clone(),
      category:      "RETAIL".to_string(),
    }
  }
}

// ─── Processor ───────────────────────────────────────────────────────────────

pub struct LeadProcessor {
  pub pos:        PosDb,
  pub middleware: MiddlewareDb,
  pub sms:        Arc<dyn SmsSender>,
  pub mailer:     Arc<dyn Mailer>,
  pub printer:    Arc<dyn DocumentPrinter>,
  /// Absent when no spreadsheet endpoint is configured.
  pub sheets:     Option<Arc<dyn SpreadsheetSink>>,
  pub errors:     Arc<ErrorHandler>,
  pub settings:   Settings,
}

impl LeadProcessor {
  /// Parse a delivery and run every step it has not completed yet.
  pub async fn process(&self, delivery: &Delivery) -> Result<()> {
    let mut lead: LeadForm = serde_json::from_str(&delivery.body)?;
    lead.sanitize();
    lead.validate()?;

    let id = delivery.message_id.as_str();
    let mut mask = self.middleware.lead_steps(id, &lead.full_name(), &lead.email, &lead.phone).await?;
    if delivery.redelivered {
      self.errors.info("lead", format!("lead {id} redelivered with steps {mask:#08b} done"));
    }
    for step in Step::ALL {
      if step.done(mask) {
        continue;
      }
      self.run(step, id, &lead).await?;
      persisted(self.middleware.mark_lead_step(id, step.bit()).await, "lead.mark_step")?;
      mask |= step.bit();
      self.errors.debug("lead", format!("lead {id}: {} done", step.name()));
    }
    self.errors.info("lead", format!("lead {id} from {} complete", lead.full_name()));
    Ok(())
  }

  async fn run(&self, step: Step, id: &str, lead: &LeadForm) -> Result<()> {
    match step {
      Step::Log => csv::append(&self.settings.leads_csv, lead).await,
      Step::StaffSms => self.notify_staff(lead).await,
      Step::CustomerEmail => self.confirm(lead).await,
      Step::Print => self.print(id, lead).await,
      Step::Spreadsheet => self.append_sheet(lead).await,
      Step::PosCustomer => self.ensure_customer(lead).await,
    }
  }

  fn values<'a>(
    &'a self,
    lead: &'a LeadForm,
    interests: &'a str,
    submitted: &'a str,
    name: &'a str,
  ) -> Vec<(&'a str, &'a str)> {
    let company = &self.settings.company;
    vec![
      ("name", name),
      ("first_name", lead.first_name.as_str()),
      ("email", lead.email.as_str()),
      ("phone", lead.phone.as_str()),
      ("interests", interests),
      ("timeline", lead.timeline.as_str()),
      ("street", lead.street.as_str()),
      ("city", lead.city.as_str()),
      ("state", lead.state.as_str()),
      ("zip_code", lead.zip_code.as_str()),
      ("comments", lead.comments.as_str()),
      ("submitted_at", submitted),
      ("company", company.name.as_str()),
      ("company_phone", company.phone.as_str()),
      ("website", company.website.as_str()),
    ]
  }

  fn interests(lead: &LeadForm) -> String {
    if lead.interested_in.is_empty() { "design services".to_string() } else { lead.interested_in.join(", ") }
  }

  async fn notify_staff(&self, lead: &LeadForm) -> Result<()> {
    let (interests, name) = (Self::interests(lead), lead.full_name());
    let body = render(STAFF_SMS, &self.values(lead, &interests, "", &name));
    for number in &self.settings.staff_numbers {
      let sid = self.sms.send_sms(number, &body).await?;
      let recorded = self.middleware.record_sms(SmsDirection::Outbound, number, &body, Some(&sid)).await;
      if !recorded.is_ok() {
        self.errors.warn("staff_sms", format!("history not recorded: {}", recorded.message));
      }
    }
    Ok(())
  }

  async fn confirm(&self, lead: &LeadForm) -> Result<()> {
    let (interests, name) = (Self::interests(lead), lead.full_name());
    let values = self.values(lead, &interests, "", &name);
    let message = EmailMessage {
      to:       lead.email.clone(),
      to_name:  Some(name.clone()),
      subject:  render(CONFIRM_SUBJECT, &values),
      html:     render(CONFIRM_BODY, &values),
      reply_to: non_empty(Some(self.settings.staff_address.as_str())),
    };
    self.mailer.send_email(&message).await?;
    Ok(())
  }

  /// Render the lead sheet from the template directory, falling back to the
  /// built-in layout.
  async fn print(&self, id: &str, lead: &LeadForm) -> Result<()> {
    let path = self.settings.templates.join(TEMPLATE_FILE);
    let template = match tokio::fs::read_to_string(&path).await {
      Ok(text) => text,
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => PRINT_TEMPLATE.to_string(),
      Err(err) => return Err(loam_core::Error::Io(err).into()),
    };
    let (interests, name) = (Self::interests(lead), lead.full_name());
    let submitted = lead.submitted_at.map(|t| t.format("%Y-%m-%d %H:%M").to_string()).unwrap_or_default();
    let mut values = self.values(lead, &interests, &submitted, &name);
    let source = match lead.source {
      loam_core::queue::LeadSource::Public => "website",
      loam_core::queue::LeadSource::Admin => "staff",
    };
    values.push(("source", source));
    let spooled = self.printer.print(&format!("lead-{id}"), &render(&template, &values)).await?;
    self.errors.debug("print", format!("spooled {}", spooled.display()));
    Ok(())
  }

  async fn append_sheet(&self, lead: &LeadForm) -> Result<()> {
    let Some(sheets) = &self.sheets else {
      return Ok(());
    };
    let row = json!({
      "submitted_at": lead.submitted_at.map(|t| t.to_rfc3339()),
      "source": lead.source,
      "name": lead.full_name(),
      "email": lead.email,
      "phone": lead.phone,
      "interested_in": lead.interested_in,
      "timeline": lead.timeline,
      "address": format!("{}, {}, {} {}", lead.street, lead.city, lead.state, lead.zip_code),
      "comments": lead.comments,
    });
    sheets.append_row(&row).await?;
    Ok(())
  }

  /// Add the lead to the POS when neither its email nor its phone is known.
  async fn ensure_customer(&self, lead: &LeadForm) -> Result<()> {
    if !self.pos.customers_by_email(&lead.email).await?.is_empty()
      || !self.pos.customers_by_phone(&lead.phone).await?.is_empty()
    {
      return Ok(());
    }
    let customer = NewCustomer {
      first_name: lead.first_name.clone(),
      last_name:  lead.last_name.clone(),
      email:      Some(lead.email.clone()),
      phone:      Some(lead.phone.clone()),
      category:   self.settings.category.clone(),
      address:    AddressRow {
        first_name: Some(lead.first_name.clone()),
        last_name:  Some(lead.last_name.clone()),
        address_1:  non_empty(Some(&lead.street)),
        city:       non_empty(Some(&lead.city)),
        state:      non_empty(Some(&lead.state)),
        zip:        non_empty(Some(&lead.zip_code)),
        country:    Some("US".to_string()),
        phone:      Some(lead.phone.clone()),
        ..AddressRow::default()
      },
    };
    let cust_no = self.pos.add_customer(&customer).await?;
    self.errors.info("CUSTOMER_ADD", format!("lead {} added to the POS as {cust_no}", lead.full_name()));
    Ok(())
  }
}
