//! Message content for each notification kind.
//!
//! Every kind has one [`Template`] entry; rendering only substitutes the shop
//! domain into it.

use crate::db::AlertKind;

use super::NotificationKind;

/// Static content for one notification kind
#[derive(Debug, Clone, Copy)]
pub struct Template {
    pub subject: &'static str,
    pub title: &'static str,
    /// HTML paragraph; `{shop}` is replaced with the escaped shop domain
    pub body: &'static str,
    /// Slack mrkdwn; `{shop}` is replaced with the shop domain
    pub slack: &'static str,
}

const REVENUE_RATE_LOW: Template = Template {
    subject: "🚨 Shopify Alert: Low Revenue Rate detected for your store.",
    title: "🚨 Low Revenue Rate Alert",
    body: "We've detected a <strong>low revenue rate</strong> in your Shopify store \
           <strong>{shop}</strong>. This may indicate fewer sales than expected.<br><br>\
           Please review your store analytics and take necessary action.",
    slack: "🚨 Low Revenue Rate detected in *{shop}*. Please review store performance.",
};

const ORDER_GROWTH_LOW: Template = Template {
    subject: "🚨 Shopify Alert: Low Order Growth detected for your store.",
    title: "🚨 Low Order Growth Alert",
    body: "Your store <strong>{shop}</strong> is experiencing <strong>low order growth</strong>. \
           Consider reviewing marketing or promotions to boost performance.",
    slack: "🚨 Low Order Growth detected in *{shop}*. Consider reviewing marketing strategies.",
};

const TRAFFIC_RATE_LOW: Template = Template {
    subject: "🚨 Shopify Alert: Low Traffic Rate detected for your store.",
    title: "🚨 Low Traffic Alert",
    body: "Your Shopify store <strong>{shop}</strong> has <strong>low traffic</strong>. \
           This may affect sales and conversions.<br><br>\
           Consider boosting SEO, ads, or social media campaigns.",
    slack: "🚨 Low Traffic Rate detected in *{shop}*. Consider boosting ads, SEO, or campaigns.",
};

const CONVERSION_RATE_LOW: Template = Template {
    subject: "🚨 Shopify Alert: Low Conversion Rate detected for your store.",
    title: "🚨 Low Conversion Rate Alert",
    body: "Your Shopify store <strong>{shop}</strong> is showing a <strong>low conversion rate</strong>. \
           Many visitors are not completing purchases.<br><br>\
           Review product pages, checkout experience, and promotions.",
    slack: "🚨 Low Conversion Rate detected in *{shop}*. Many visitors are not converting to customers.",
};

const EMAIL_TEST: Template = Template {
    subject: "✉️ Test Email: Email delivery test from your Observa monitoring app.",
    title: "✉️ Test Email Delivery",
    body: "This is a <strong>test email</strong> from your Observa monitoring app for \
           <strong>{shop}</strong>.<br><br>Please locate this email in your inbox (and spam \
           folder if necessary) and mark it as <strong>Not Spam</strong> to improve future \
           deliverability.",
    slack: "✉️ Test Email: This is a test alert from your Observa monitoring app for *{shop}*.",
};

pub fn template(kind: NotificationKind) -> &'static Template {
    match kind {
        NotificationKind::Alert(AlertKind::RevenueRateLow) => &REVENUE_RATE_LOW,
        NotificationKind::Alert(AlertKind::OrderGrowthLow) => &ORDER_GROWTH_LOW,
        NotificationKind::Alert(AlertKind::TrafficRateLow) => &TRAFFIC_RATE_LOW,
        NotificationKind::Alert(AlertKind::ConversionRateLow) => &CONVERSION_RATE_LOW,
        NotificationKind::EmailTest => &EMAIL_TEST,
    }
}

/// A rendered email, ready for the mailer
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

pub fn render_email(kind: NotificationKind, shop: &str) -> RenderedEmail {
    let t = template(kind);
    let body = t.body.replace("{shop}", &html_escape(shop));

    let html_body = format!(
        r#"<!DOCTYPE html>
<html>
<body style="margin:0; padding:0; background:#f4f6f8; font-family:Arial, sans-serif; color:#333;">
  <table width="100%" cellspacing="0" cellpadding="0" style="padding:30px 0;">
    <tr>
      <td align="center">
        <table width="600" cellspacing="0" cellpadding="0" style="background:#fff; border-radius:10px; overflow:hidden;">
          <tr>
            <td style="background:#2c7a7b; padding:20px; text-align:center; color:#fff; font-size:22px; font-weight:bold;">
              Shopify Store Alert
            </td>
          </tr>
          <tr>
            <td style="padding:30px; font-size:16px; line-height:1.6; color:#444;">
              <h2 style="color:#d9534f; margin-top:0;">{title}</h2>
              <p>Dear Merchant,</p>
              <p>{body}</p>
            </td>
          </tr>
          <tr>
            <td style="background:#f4f6f8; padding:15px; text-align:center; font-size:12px; color:#888;">
              &copy; {year} Observa &bull; This is an automated alert
            </td>
          </tr>
        </table>
      </td>
    </tr>
  </table>
</body>
</html>"#,
        title = t.title,
        body = body,
        year = chrono::Utc::now().format("%Y"),
    );

    RenderedEmail {
        subject: t.subject.to_string(),
        html_body,
        text_body: render_text(t, shop),
    }
}

/// Plain text alternative: the title followed by the body without markup
fn render_text(t: &Template, shop: &str) -> String {
    let body = t
        .body
        .replace("<br><br>", "\n\n")
        .replace("<strong>", "")
        .replace("</strong>", "")
        .replace("{shop}", shop);
    format!("{}\n\nDear Merchant,\n\n{}\n", t.title, body)
}

pub fn render_slack_text(kind: NotificationKind, shop: &str) -> String {
    template(kind).slack.replace("{shop}", shop)
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
