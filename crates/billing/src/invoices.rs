//! Invoice hygiene around off-session (boleto/pix) charges, and the
//! customer-facing invoice list
//!
//! Only one payable invoice should reach the customer: stale open invoices
//! are voided and stale drafts deleted before the new one is sent.

use serde::Serialize;

use crate::error::BillingResult;
use crate::gateway::{BillingGateway, InvoiceState, RemoteInvoice};

pub const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

/// Filters and paging for the invoice list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceQuery {
    /// Case-insensitive match on invoice id or number
    pub search: Option<String>,
    pub status: Option<InvoiceState>,
    pub paid: Option<bool>,
    /// 1-based
    pub page: usize,
    pub per_page: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoicePage {
    pub invoices: Vec<RemoteInvoice>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub total_pages: usize,
}

impl InvoicePage {
    fn empty(page: usize, per_page: usize) -> Self {
        Self {
            invoices: Vec::new(),
            page,
            per_page,
            total: 0,
            total_pages: 0,
        }
    }
}

fn matches_search(invoice: &RemoteInvoice, needle: &str) -> bool {
    invoice.id.to_lowercase().contains(needle)
        || invoice
            .number
            .as_deref()
            .is_some_and(|n| n.to_lowercase().contains(needle))
}

/// Invoices of `customer_id`, newest first, filtered and paged.
///
/// A missing customer yields an empty page without calling the provider.
/// Pages past the end are clamped to the last page.
pub async fn list_customer_invoices<G: BillingGateway>(
    gateway: &G,
    customer_id: Option<&str>,
    query: &InvoiceQuery,
) -> BillingResult<InvoicePage> {
    let per_page = match query.per_page {
        0 => DEFAULT_PAGE_SIZE,
        n => n.min(MAX_PAGE_SIZE),
    };
    let page = query.page.max(1);

    let Some(customer_id) = customer_id.filter(|id| !id.is_empty()) else {
        return Ok(InvoicePage::empty(page, per_page));
    };

    let needle = query
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let mut invoices: Vec<RemoteInvoice> = gateway
        .list_invoices(customer_id, query.status)
        .await?
        .into_iter()
        .filter(|i| query.paid.map_or(true, |paid| i.paid == paid))
        .filter(|i| needle.as_deref().map_or(true, |n| matches_search(i, n)))
        .collect();
    invoices.sort_by(|a, b| b.created.cmp(&a.created));

    let total = invoices.len();
    let total_pages = total.div_ceil(per_page);
    let page = page.min(total_pages.max(1));
    let invoices = invoices
        .into_iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .collect();

    Ok(InvoicePage {
        invoices,
        page,
        per_page,
        total,
        total_pages,
    })
}

/// Void every open invoice of the customer except `keep`. Returns how many were voided.
pub async fn void_other_open_invoices<G: BillingGateway>(
    gateway: &G,
    customer_id: &str,
    keep: Option<&str>,
) -> BillingResult<usize> {
    if customer_id.is_empty() {
        return Ok(0);
    }
    let mut voided = 0;
    for invoice in gateway.list_invoices(customer_id, Some(InvoiceState::Open)).await? {
        if keep == Some(invoice.id.as_str()) {
            continue;
        }
        match gateway.void_invoice(&invoice.id).await {
            Ok(()) => voided += 1,
            Err(err) => {
                tracing::warn!(invoice_id = %invoice.id, error = %err, "Could not void invoice")
            }
        }
    }
    Ok(voided)
}

/// Delete every draft invoice of the customer except `keep`. Returns how many were deleted.
pub async fn delete_other_draft_invoices<G: BillingGateway>(
    gateway: &G,
    customer_id: &str,
    keep: Option<&str>,
) -> BillingResult<usize> {
    if customer_id.is_empty() {
        return Ok(0);
    }
    let mut deleted = 0;
    for invoice in gateway.list_invoices(customer_id, Some(InvoiceState::Draft)).await? {
        if keep == Some(invoice.id.as_str()) {
            continue;
        }
        match gateway.delete_invoice(&invoice.id).await {
            Ok(()) => deleted += 1,
            Err(err) => {
                tracing::warn!(invoice_id = %invoice.id, error = %err, "Could not delete draft invoice")
            }
        }
    }
    Ok(deleted)
}

/// Clean up competing invoices, then finalize and send `invoice_id`.
///
/// Returns the hosted payment page, or `None` when the provider gave none.
pub async fn finalize_and_send<G: BillingGateway>(
    gateway: &G,
    customer_id: &str,
    invoice_id: &str,
) -> BillingResult<Option<String>> {
    if let Err(err) = void_other_open_invoices(gateway, customer_id, Some(invoice_id)).await {
        tracing::warn!(customer_id = %customer_id, error = %err, "Open invoice cleanup failed");
    }
    if let Err(err) = delete_other_draft_invoices(gateway, customer_id, Some(invoice_id)).await {
        tracing::warn!(customer_id = %customer_id, error = %err, "Draft invoice cleanup failed");
    }

    let mut invoice = gateway.retrieve_invoice(invoice_id).await?;
    if invoice.is_draft() {
        invoice = gateway.finalize_invoice(invoice_id).await?;
    }

    // Must not inherit a saved card
    if let Err(err) = gateway.clear_invoice_default_payment_method(invoice_id).await {
        tracing::debug!(invoice_id = %invoice_id, error = %err, "Could not clear invoice payment method");
    }
    if let Err(err) = gateway.send_invoice(invoice_id).await {
        tracing::warn!(invoice_id = %invoice_id, error = %err, "Could not send invoice");
    }

    Ok(invoice.hosted_invoice_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BillingError;
    use crate::testing::{invoice, FakeStripe};

    #[tokio::test]
    async fn test_finalize_and_send_cleans_competitors() {
        let gateway = FakeStripe::new();
        gateway.insert_invoice("cus_1", invoice("in_old_open", "open"));
        gateway.insert_invoice("cus_1", invoice("in_old_draft", "draft"));
        gateway.insert_invoice("cus_1", invoice("in_new", "draft"));
        gateway.insert_invoice("cus_2", invoice("in_other_customer", "open"));

        let url = finalize_and_send(&gateway, "cus_1", "in_new").await.unwrap();

        assert_eq!(url.as_deref(), Some("https://invoice.test/in_new"));
        assert_eq!(
            gateway.invoice("in_old_open").unwrap().status.as_deref(),
            Some("void")
        );
        assert!(gateway.invoice("in_old_draft").is_none());
        assert_eq!(gateway.invoice("in_new").unwrap().status.as_deref(), Some("open"));
        assert_eq!(
            gateway.invoice("in_other_customer").unwrap().status.as_deref(),
            Some("open")
        );
        assert!(gateway.calls().contains(&"send_invoice:in_new".to_string()));
    }

    #[tokio::test]
    async fn test_void_failures_are_tolerated() {
        let gateway = FakeStripe::new();
        gateway.insert_invoice("cus_1", invoice("in_a", "open"));
        gateway.insert_invoice("cus_1", invoice("in_b", "open"));
        gateway.fail_next(
            "void_invoice",
            BillingError::Rejected {
                message: "Invoice is already paid".to_string(),
                code: None,
            },
        );

        let voided = void_other_open_invoices(&gateway, "cus_1", None).await.unwrap();
        assert_eq!(voided, 1);
    }

    fn dated(id: &str, status: &str, number: &str, created: i64) -> RemoteInvoice {
        let mut inv = invoice(id, status);
        inv.number = Some(number.to_string());
        inv.created = created;
        inv
    }

    fn seeded() -> FakeStripe {
        let gateway = FakeStripe::new();
        gateway.insert_invoice("cus_1", dated("in_a", "paid", "STAR-0001", 100));
        gateway.insert_invoice("cus_1", dated("in_b", "open", "STAR-0002", 200));
        gateway.insert_invoice("cus_1", dated("in_c", "paid", "STAR-0003", 300));
        gateway.insert_invoice("cus_1", dated("in_d", "void", "STAR-0004", 400));
        gateway.insert_invoice("cus_2", dated("in_x", "paid", "OTHER-0001", 500));
        gateway
    }

    fn ids(page: &InvoicePage) -> Vec<&str> {
        page.invoices.iter().map(|i| i.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_invoice_list_is_newest_first_and_scoped_to_customer() {
        let gateway = seeded();
        let page = list_customer_invoices(&gateway, Some("cus_1"), &InvoiceQuery::default())
            .await
            .unwrap();

        assert_eq!(ids(&page), vec!["in_d", "in_c", "in_b", "in_a"]);
        assert_eq!(page.per_page, DEFAULT_PAGE_SIZE);
        assert_eq!((page.page, page.total, page.total_pages), (1, 4, 1));
    }

    #[tokio::test]
    async fn test_invoice_list_filters() {
        let gateway = seeded();

        let paid = InvoiceQuery {
            paid: Some(true),
            ..Default::default()
        };
        let page = list_customer_invoices(&gateway, Some("cus_1"), &paid).await.unwrap();
        assert_eq!(ids(&page), vec!["in_c", "in_a"]);

        let open = InvoiceQuery {
            status: Some(InvoiceState::Open),
            ..Default::default()
        };
        let page = list_customer_invoices(&gateway, Some("cus_1"), &open).await.unwrap();
        assert_eq!(ids(&page), vec!["in_b"]);

        let search = InvoiceQuery {
            search: Some(" star-0003 ".to_string()),
            ..Default::default()
        };
        let page = list_customer_invoices(&gateway, Some("cus_1"), &search).await.unwrap();
        assert_eq!(ids(&page), vec!["in_c"]);
    }

    #[tokio::test]
    async fn test_invoice_list_paging_clamps() {
        let gateway = seeded();
        let query = InvoiceQuery {
            page: 9,
            per_page: 3,
            ..Default::default()
        };
        let page = list_customer_invoices(&gateway, Some("cus_1"), &query).await.unwrap();
        assert_eq!((page.page, page.total_pages), (2, 2));
        assert_eq!(ids(&page), vec!["in_a"]);
    }

    #[tokio::test]
    async fn test_invoice_list_without_customer_is_empty() {
        let gateway = seeded();
        gateway.fail_next(
            "list_invoices",
            BillingError::StripeApi("should not be called".to_string()),
        );
        let page = list_customer_invoices(&gateway, None, &InvoiceQuery::default())
            .await
            .unwrap();
        assert!(page.invoices.is_empty());
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_blank_customer_is_noop() {
        let gateway = FakeStripe::new();
        assert_eq!(delete_other_draft_invoices(&gateway, "", None).await.unwrap(), 0);
        assert_eq!(gateway.mutation_count(), 0);
    }
}
