//! Live Stripe implementation of the billing gateway

use serde::Serialize;
use serde_json::Value;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    BillingGateway, CheckoutSessionParams, CustomerPayload, InvoiceState, List, NewPrice,
    PortalSessionParams, ProductParams, RemoteInvoice, RemotePaymentMethod,
    RemotePaymentMethodConfiguration, RemotePortalConfiguration, RemotePrice, RemoteProduct,
    RemoteSession, RemoteSetupIntent, RemoteSubscription, SubscriptionUpdate, Toggle,
};

const PAGE_SIZE: u32 = 100;

#[derive(Serialize)]
struct NoParams {}

#[derive(Serialize)]
struct ActiveFlag {
    active: bool,
}

#[derive(Serialize)]
struct DefaultPrice<'a> {
    default_price: &'a str,
}

#[derive(Serialize)]
struct Nickname<'a> {
    nickname: &'a str,
}

/// An empty id clears the default
#[derive(Serialize)]
struct DefaultPaymentMethod<'a> {
    default_payment_method: &'a str,
}

#[derive(Serialize)]
struct InvoiceSettingsForm<'a> {
    invoice_settings: DefaultPaymentMethod<'a>,
}

#[derive(Serialize)]
struct SetupIntentForm<'a> {
    customer: &'a str,
    usage: &'static str,
    automatic_payment_methods: Toggle,
}

#[derive(Serialize)]
struct AttachForm<'a> {
    customer: &'a str,
}

#[derive(Serialize)]
struct PageQuery<'a> {
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    product: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'a str>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    starting_after: Option<String>,
}

impl<'a> PageQuery<'a> {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            product: None,
            customer: None,
            status: None,
            kind: None,
            starting_after: None,
        }
    }
}

/// Map "not found" to `None`, keep every other failure
fn missing_as_none<T>(result: Result<T, stripe::StripeError>) -> BillingResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) => match BillingError::from(err) {
            BillingError::ResourceMissing { .. } => Ok(None),
            other => Err(other),
        },
    }
}

impl StripeClient {
    /// Follow `starting_after` cursors until the list is exhausted
    async fn list_all<T, F>(&self, path: &str, mut query: PageQuery<'_>, id_of: F) -> BillingResult<Vec<T>>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(&T) -> String,
    {
        let mut all = Vec::new();
        loop {
            let page: List<T> = self.inner().get_query(path, &query).await?;
            let has_more = page.has_more;
            let cursor = page.data.last().map(&id_of);
            all.extend(page.data);

            match cursor {
                Some(cursor) if has_more => query.starting_after = Some(cursor),
                _ => break,
            }
        }
        Ok(all)
    }
}

impl BillingGateway for StripeClient {
    async fn retrieve_product(&self, id: &str) -> BillingResult<Option<RemoteProduct>> {
        if id.is_empty() {
            return Ok(None);
        }
        let product = missing_as_none(
            self.inner()
                .get::<RemoteProduct>(&format!("/products/{id}"))
                .await,
        )?;
        Ok(product.filter(|p| !p.deleted))
    }

    async fn create_product(
        &self,
        params: &ProductParams,
        idempotency_key: String,
    ) -> BillingResult<RemoteProduct> {
        let product: RemoteProduct = self
            .idempotent(idempotency_key)
            .post_form("/products", params)
            .await?;
        tracing::debug!(product_id = %product.id, "Created Stripe product");
        Ok(product)
    }

    async fn update_product(
        &self,
        id: &str,
        params: &ProductParams,
        idempotency_key: String,
    ) -> BillingResult<RemoteProduct> {
        Ok(self
            .idempotent(idempotency_key)
            .post_form(&format!("/products/{id}"), params)
            .await?)
    }

    async fn set_default_price(
        &self,
        product_id: &str,
        price_id: &str,
        idempotency_key: String,
    ) -> BillingResult<()> {
        let _: Value = self
            .idempotent(idempotency_key)
            .post_form(
                &format!("/products/{product_id}"),
                &DefaultPrice {
                    default_price: price_id,
                },
            )
            .await?;
        Ok(())
    }

    async fn archive_product(&self, id: &str) -> BillingResult<()> {
        let _: Value = self
            .inner()
            .post_form(&format!("/products/{id}"), &ActiveFlag { active: false })
            .await?;
        Ok(())
    }

    async fn delete_product(&self, id: &str) -> BillingResult<()> {
        let _: Value = self.inner().delete(&format!("/products/{id}")).await?;
        Ok(())
    }

    async fn retrieve_price(&self, id: &str) -> BillingResult<Option<RemotePrice>> {
        if id.is_empty() {
            return Ok(None);
        }
        missing_as_none(self.inner().get::<RemotePrice>(&format!("/prices/{id}")).await)
    }

    async fn create_price(
        &self,
        params: &NewPrice,
        idempotency_key: String,
    ) -> BillingResult<RemotePrice> {
        let price: RemotePrice = self
            .idempotent(idempotency_key)
            .post_form("/prices", params)
            .await?;
        tracing::debug!(price_id = %price.id, product_id = %params.product, "Created Stripe price");
        Ok(price)
    }

    async fn update_price_nickname(
        &self,
        id: &str,
        nickname: &str,
        idempotency_key: String,
    ) -> BillingResult<()> {
        let _: Value = self
            .idempotent(idempotency_key)
            .post_form(&format!("/prices/{id}"), &Nickname { nickname })
            .await?;
        Ok(())
    }

    async fn deactivate_price(&self, id: &str, idempotency_key: String) -> BillingResult<()> {
        let _: Value = self
            .idempotent(idempotency_key)
            .post_form(&format!("/prices/{id}"), &ActiveFlag { active: false })
            .await?;
        Ok(())
    }

    async fn activate_price(&self, id: &str, idempotency_key: String) -> BillingResult<()> {
        let _: Value = self
            .idempotent(idempotency_key)
            .post_form(&format!("/prices/{id}"), &ActiveFlag { active: true })
            .await?;
        Ok(())
    }

    async fn list_prices(&self, product_id: &str) -> BillingResult<Vec<RemotePrice>> {
        let mut query = PageQuery::new(PAGE_SIZE);
        query.product = Some(product_id);
        self.list_all("/prices", query, |p: &RemotePrice| p.id.clone())
            .await
    }

    async fn create_customer(
        &self,
        payload: &CustomerPayload,
        idempotency_key: String,
    ) -> BillingResult<String> {
        let customer: Value = self
            .idempotent(idempotency_key)
            .post_form("/customers", payload)
            .await?;
        customer
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BillingError::StripeApi("customer response without id".to_string()))
    }

    async fn update_customer(&self, id: &str, payload: &CustomerPayload) -> BillingResult<()> {
        let _: Value = self
            .inner()
            .post_form(&format!("/customers/{id}"), payload)
            .await?;
        Ok(())
    }

    async fn delete_customer(&self, id: &str) -> BillingResult<()> {
        let _: Value = self.inner().delete(&format!("/customers/{id}")).await?;
        Ok(())
    }

    async fn clear_customer_default_payment_method(&self, id: &str) -> BillingResult<()> {
        let _: Value = self
            .inner()
            .post_form(
                &format!("/customers/{id}"),
                &InvoiceSettingsForm {
                    invoice_settings: DefaultPaymentMethod {
                        default_payment_method: "",
                    },
                },
            )
            .await?;
        Ok(())
    }

    async fn customer_default_payment_method(&self, id: &str) -> BillingResult<Option<String>> {
        let customer: Value = self.inner().get(&format!("/customers/{id}")).await?;
        let default = customer
            .get("invoice_settings")
            .and_then(|s| s.get("default_payment_method"));
        Ok(default
            .and_then(|d| d.as_str().or_else(|| d.get("id").and_then(Value::as_str)))
            .map(str::to_string))
    }

    async fn set_customer_default_payment_method(
        &self,
        id: &str,
        payment_method_id: &str,
    ) -> BillingResult<()> {
        let _: Value = self
            .inner()
            .post_form(
                &format!("/customers/{id}"),
                &InvoiceSettingsForm {
                    invoice_settings: DefaultPaymentMethod {
                        default_payment_method: payment_method_id,
                    },
                },
            )
            .await?;
        Ok(())
    }

    async fn create_setup_intent(&self, customer_id: &str) -> BillingResult<RemoteSetupIntent> {
        Ok(self
            .inner()
            .post_form(
                "/setup_intents",
                &SetupIntentForm {
                    customer: customer_id,
                    usage: "off_session",
                    automatic_payment_methods: Toggle { enabled: true },
                },
            )
            .await?)
    }

    async fn list_card_payment_methods(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<RemotePaymentMethod>> {
        let mut query = PageQuery::new(PAGE_SIZE);
        query.customer = Some(customer_id);
        query.kind = Some("card");
        self.list_all("/payment_methods", query, |p: &RemotePaymentMethod| p.id.clone())
            .await
    }

    async fn retrieve_payment_method(&self, id: &str) -> BillingResult<RemotePaymentMethod> {
        Ok(self
            .inner()
            .get::<RemotePaymentMethod>(&format!("/payment_methods/{id}"))
            .await?)
    }

    async fn attach_payment_method(
        &self,
        id: &str,
        customer_id: &str,
    ) -> BillingResult<RemotePaymentMethod> {
        Ok(self
            .inner()
            .post_form(
                &format!("/payment_methods/{id}/attach"),
                &AttachForm {
                    customer: customer_id,
                },
            )
            .await?)
    }

    async fn detach_payment_method(&self, id: &str) -> BillingResult<()> {
        let _: Value = self
            .inner()
            .post_form(&format!("/payment_methods/{id}/detach"), &NoParams {})
            .await?;
        Ok(())
    }

    async fn retrieve_subscription(&self, id: &str) -> BillingResult<RemoteSubscription> {
        Ok(self
            .inner()
            .get::<RemoteSubscription>(&format!("/subscriptions/{id}"))
            .await?)
    }

    async fn list_subscriptions(&self, customer_id: &str) -> BillingResult<Vec<RemoteSubscription>> {
        let mut query = PageQuery::new(20);
        query.customer = Some(customer_id);
        query.status = Some("all");
        let page: List<RemoteSubscription> =
            self.inner().get_query("/subscriptions", &query).await?;
        Ok(page.data)
    }

    async fn update_subscription(
        &self,
        id: &str,
        params: &SubscriptionUpdate,
    ) -> BillingResult<RemoteSubscription> {
        Ok(self
            .inner()
            .post_form(&format!("/subscriptions/{id}"), params)
            .await?)
    }

    async fn cancel_subscription(&self, id: &str) -> BillingResult<RemoteSubscription> {
        Ok(self
            .inner()
            .delete::<RemoteSubscription>(&format!("/subscriptions/{id}"))
            .await?)
    }

    async fn list_invoices(
        &self,
        customer_id: &str,
        state: Option<InvoiceState>,
    ) -> BillingResult<Vec<RemoteInvoice>> {
        let mut query = PageQuery::new(PAGE_SIZE);
        query.customer = Some(customer_id);
        query.status = state.as_ref().map(InvoiceState::as_str);
        self.list_all("/invoices", query, |i: &RemoteInvoice| i.id.clone())
            .await
    }

    async fn retrieve_invoice(&self, id: &str) -> BillingResult<RemoteInvoice> {
        Ok(self
            .inner()
            .get::<RemoteInvoice>(&format!("/invoices/{id}"))
            .await?)
    }

    async fn finalize_invoice(&self, id: &str) -> BillingResult<RemoteInvoice> {
        Ok(self
            .inner()
            .post_form(&format!("/invoices/{id}/finalize"), &NoParams {})
            .await?)
    }

    async fn void_invoice(&self, id: &str) -> BillingResult<()> {
        let _: Value = self
            .inner()
            .post_form(&format!("/invoices/{id}/void"), &NoParams {})
            .await?;
        Ok(())
    }

    async fn delete_invoice(&self, id: &str) -> BillingResult<()> {
        let _: Value = self.inner().delete(&format!("/invoices/{id}")).await?;
        Ok(())
    }

    async fn clear_invoice_default_payment_method(&self, id: &str) -> BillingResult<()> {
        let _: Value = self
            .inner()
            .post_form(
                &format!("/invoices/{id}"),
                &DefaultPaymentMethod {
                    default_payment_method: "",
                },
            )
            .await?;
        Ok(())
    }

    async fn send_invoice(&self, id: &str) -> BillingResult<RemoteInvoice> {
        Ok(self
            .inner()
            .post_form(&format!("/invoices/{id}/send"), &NoParams {})
            .await?)
    }

    async fn create_checkout_session(
        &self,
        params: &CheckoutSessionParams,
    ) -> BillingResult<RemoteSession> {
        Ok(self.inner().post_form("/checkout/sessions", params).await?)
    }

    async fn list_portal_configurations(&self) -> BillingResult<Vec<RemotePortalConfiguration>> {
        let page: List<RemotePortalConfiguration> = self
            .inner()
            .get_query("/billing_portal/configurations", &PageQuery::new(1))
            .await?;
        Ok(page.data)
    }

    async fn create_portal_session(
        &self,
        params: &PortalSessionParams,
    ) -> BillingResult<RemoteSession> {
        Ok(self
            .inner()
            .post_form("/billing_portal/sessions", params)
            .await?)
    }

    async fn list_payment_method_configurations(
        &self,
    ) -> BillingResult<Vec<RemotePaymentMethodConfiguration>> {
        self.list_all(
            "/payment_method_configurations",
            PageQuery::new(PAGE_SIZE),
            |c: &RemotePaymentMethodConfiguration| c.id.clone(),
        )
        .await
    }
}
