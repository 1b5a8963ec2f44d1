//! Back-in-stock alerts.

use std::collections::BTreeMap;

use loam_core::notify::{EmailMessage, render};

use crate::SyncContext;

const EMAIL_SUBJECT: &str = "{{title}} is back in stock at {{company}}";
const EMAIL_BODY: &str = "<p>Good news! <strong>{{title}}</strong> (item {{item_no}}) is back in \
                          stock.</p><p>Quantities are limited, so stop by soon.</p><p>{{company}}</p>";
const SMS_BODY: &str = "{{company}}: {{title}} is back in stock. Reply STOP to opt out.";

/// Send the stored notifications for items that just came back into stock.
/// `items` pairs an item number with the title shown to the customer.
/// Requests whose every channel succeeded are removed; the rest stay for the
/// next restock.
pub async fn notify_restocked<S>(ctx: &SyncContext<S>, items: &[(String, String)]) {
  let titles: BTreeMap<&str, &str> = items.iter().map(|(i, t)| (i.as_str(), t.as_str())).collect();
  let requests = match ctx.middleware.stock_requests(items.iter().map(|(i, _)| i.clone()).collect()).await {
    Ok(requests) => requests,
    Err(err) => {
      ctx.errors.warn("stock", format!("cannot load stock requests: {err}"));
      return;
    }
  };

  let company = ctx.settings.company_name.as_str();
  let mut done = Vec::new();
  for request in requests {
    let title = titles.get(request.item_no.as_str()).copied().unwrap_or(request.item_no.as_str());
    let values = [("title", title), ("item_no", request.item_no.as_str()), ("company", company)];
    let mut ok = true;

    if let Some(email) = &request.email {
      let message = EmailMessage {
        to:       email.clone(),
        to_name:  None,
        subject:  render(EMAIL_SUBJECT, &values),
        html:     render(EMAIL_BODY, &values),
        reply_to: None,
      };
      if let Err(err) = ctx.mailer.send_email(&message).await {
        ctx.errors.warn("stock", format!("request {}: email not sent: {err}", request.id));
        ok = false;
      }
    }
    if let Some(phone) = &request.phone {
      if let Err(err) = ctx.sms.send_sms(phone, &render(SMS_BODY, &values)).await {
        ctx.errors.warn("stock", format!("request {}: sms not sent: {err}", request.id));
        ok = false;
      }
    }
    if ok {
      done.push(request.id);
    }
  }

  if done.is_empty() {
    return;
  }
  let count = done.len();
  let envelope = ctx.middleware.delete_stock_requests(done).await;
  if envelope.is_ok() {
    ctx.errors.info("stock", format!("sent {count} back-in-stock notifications"));
  } else {
    ctx.errors.warn("stock", format!("sent notifications not cleared: {}", envelope.message));
  }
}
