//! Coupon evaluator.
//!
//! Previews never write. `consume` is the only path that spends a coupon
//! and it runs the eligibility checks again inside the conditional update,
//! so two checkouts racing for a one-time coupon cannot both win.

use chrono::{DateTime, Utc};
use common::{CouponId, Money, OrderId, Owner, UsageId};
use domain::{
    Coupon, CouponRejection, CouponUsage, Entity, MutationError, Repository, normalize_code,
};
use serde::Serialize;
use store::{RecordStore, RecordStoreExt};

use crate::error::{CheckoutError, Result};

/// Outcome of a coupon preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub code: String,
    pub applicable: bool,
    pub discount_amount: Money,
    pub reason: Option<CouponRejection>,
    #[serde(skip)]
    pub coupon_id: Option<CouponId>,
}

impl ValidationResult {
    fn rejected(code: String, reason: CouponRejection) -> Self {
        Self {
            code,
            applicable: false,
            discount_amount: Money::zero(),
            reason: Some(reason),
            coupon_id: None,
        }
    }

    /// Converts a rejection into a preview error.
    pub fn into_applicable(self) -> Result<Self> {
        match self.reason {
            Some(reason) => Err(CheckoutError::CouponIneligible(reason)),
            None => Ok(self),
        }
    }
}

/// Everything `consume` needs to spend a coupon on an order.
#[derive(Debug, Clone)]
pub struct ConsumeRequest<'a> {
    /// Chosen by the caller before the coupon is touched; the coupon and
    /// the ledger row both carry it.
    pub usage_id: UsageId,
    pub code: &'a str,
    pub order_id: OrderId,
    pub owner: &'a Owner,
    pub original_amount: Money,
    pub discount_amount: Money,
}

/// Applicability checks, consumption and reversal of coupons.
pub struct CouponEvaluator<S: RecordStore> {
    coupons: Repository<S, Coupon>,
    usages: Repository<S, CouponUsage>,
    max_retries: u32,
}

impl<S: RecordStore + Clone> Clone for CouponEvaluator<S> {
    fn clone(&self) -> Self {
        Self {
            coupons: self.coupons.clone(),
            usages: self.usages.clone(),
            max_retries: self.max_retries,
        }
    }
}

impl<S: RecordStore + Clone> CouponEvaluator<S> {
    pub fn new(store: S, max_retries: u32) -> Self {
        Self {
            coupons: Repository::new(store.clone()),
            usages: Repository::new(store),
            max_retries,
        }
    }
}

impl<S: RecordStore> CouponEvaluator<S> {
    /// Previews `code` against a subtotal for an owner, as of now.
    pub async fn validate(
        &self,
        code: &str,
        subtotal: Money,
        owner: &Owner,
    ) -> Result<ValidationResult> {
        self.validate_at(code, subtotal, owner, Utc::now()).await
    }

    /// Previews `code` as of `now`.
    ///
    /// Rejections are reported in the result; only storage faults are errors.
    pub async fn validate_at(
        &self,
        code: &str,
        subtotal: Money,
        owner: &Owner,
        now: DateTime<Utc>,
    ) -> Result<ValidationResult> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Ok(ValidationResult::rejected(code, CouponRejection::NotFound));
        }
        let Some(coupon) = self.coupons.get(&code).await? else {
            return Ok(ValidationResult::rejected(code, CouponRejection::NotFound));
        };

        Ok(match coupon.evaluate(subtotal, owner, now) {
            Ok(discount_amount) => ValidationResult {
                code,
                applicable: true,
                discount_amount,
                reason: None,
                coupon_id: Some(coupon.id()),
            },
            Err(reason) => ValidationResult::rejected(code, reason),
        })
    }

    /// Spends the coupon and appends a usage row.
    ///
    /// Any rejection here is `CouponNoLongerValid`: the coupon was valid at
    /// preview time and something changed since.
    #[tracing::instrument(skip(self, request), fields(code = request.code, order_id = %request.order_id, usage_id = %request.usage_id))]
    pub async fn consume(&self, request: ConsumeRequest<'_>) -> Result<CouponUsage> {
        let code = normalize_code(request.code);
        let now = Utc::now();
        let owner = request.owner;
        let usage_id = request.usage_id;
        let (original, discount) = (request.original_amount, request.discount_amount);

        let mutation = self
            .coupons
            .mutate(&code, self.max_retries, |coupon| {
                coupon.consume(usage_id, original, discount, owner, now)
            })
            .await
            .map_err(coupon_mutation_error)?;

        let usage = CouponUsage {
            id: usage_id,
            coupon_id: mutation.entity.id(),
            coupon_code: code.clone(),
            order_id: request.order_id,
            owner: owner.clone(),
            original_amount: original,
            discount_amount: discount,
            final_amount: original.saturating_sub(discount),
            remaining_balance: mutation.output,
            used_at: now,
        };

        if let Err(e) = self.usages.insert(&usage).await {
            tracing::error!(code = %code, error = %e, "failed to record coupon usage, reverting");
            self.restore_counters(&code, usage_id).await?;
            return Err(e.into());
        }

        metrics::counter!("coupon_consumptions_total").increment(1);
        tracing::info!(code = %code, discount = %discount, "coupon consumed");
        Ok(usage)
    }

    /// Deletes the usage row. Returns false if it was never written or is
    /// already gone.
    pub async fn remove_usage(&self, usage_id: UsageId) -> Result<bool> {
        Ok(self.usages.delete(&usage_id.to_string()).await?)
    }

    /// Puts back the balance, used flag and usage count taken under
    /// `usage_id`.
    ///
    /// Returns false if the coupon holds no such consumption.
    pub async fn restore_counters(&self, code: &str, usage_id: UsageId) -> Result<bool> {
        let mutation = self
            .coupons
            .mutate(&normalize_code(code), self.max_retries, |coupon| {
                Ok::<_, CouponRejection>(coupon.reverse(usage_id))
            })
            .await
            .map_err(coupon_mutation_error)?;
        Ok(mutation.output)
    }

    /// Undoes a consumption at most once, keyed on the usage id.
    ///
    /// Counters come back first, then the ledger row goes. Returns false if
    /// there was nothing left to undo.
    #[tracing::instrument(skip(self))]
    pub async fn reverse(&self, code: &str, usage_id: UsageId) -> Result<bool> {
        let restored = self.restore_counters(code, usage_id).await?;
        let removed = self.remove_usage(usage_id).await?;
        Ok(restored || removed)
    }

    /// Every recorded usage of a coupon, oldest first.
    pub async fn usage_history(&self, code: &str) -> Result<Vec<CouponUsage>> {
        let code = normalize_code(code);
        let mut usages: Vec<_> = self
            .usages
            .list()
            .await?
            .into_iter()
            .filter(|u| u.coupon_code == code)
            .collect();
        usages.sort_by_key(|u| u.used_at);
        Ok(usages)
    }

    pub async fn get_coupon(&self, code: &str) -> Result<Coupon> {
        let code = normalize_code(code);
        self.coupons
            .get(&code)
            .await?
            .ok_or(CheckoutError::NotFound {
                entity: Coupon::KIND,
                id: code,
            })
    }

    /// Writes a coupon record as-is, replacing any existing one.
    ///
    /// Used for loading reference data, never on the checkout path.
    pub async fn upsert_coupon(&self, coupon: &Coupon) -> Result<()> {
        let payload = serde_json::to_value(coupon)
            .map_err(|e| CheckoutError::PersistenceFailure(e.to_string()))?;
        self.coupons
            .store()
            .put(Coupon::KIND, &coupon.entity_id(), payload)
            .await
            .map_err(|e| CheckoutError::PersistenceFailure(e.to_string()))?;
        Ok(())
    }
}

fn coupon_mutation_error(e: MutationError<CouponRejection>) -> CheckoutError {
    match e {
        MutationError::Rejected(reason) => CheckoutError::CouponNoLongerValid(reason),
        MutationError::NotFound { .. } => {
            CheckoutError::CouponNoLongerValid(CouponRejection::NotFound)
        }
        MutationError::Exhausted { kind, id, .. } => CheckoutError::Conflict { entity: kind, id },
        MutationError::Repository(e) => e.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::{SessionToken, UserId};
    use domain::Discount;
    use store::InMemoryRecordStore;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        (now - Duration::days(1), now + Duration::days(1))
    }

    fn anon() -> Owner {
        Owner::Session(SessionToken::new("s1"))
    }

    async fn evaluator_with(coupon: Coupon) -> (CouponEvaluator<InMemoryRecordStore>, InMemoryRecordStore) {
        let store = InMemoryRecordStore::new();
        let evaluator = CouponEvaluator::new(store.clone(), 16);
        evaluator.upsert_coupon(&coupon).await.unwrap();
        (evaluator, store)
    }

    fn request<'a>(owner: &'a Owner, discount: i64) -> ConsumeRequest<'a> {
        ConsumeRequest {
            usage_id: UsageId::new(),
            code: "welcome",
            order_id: OrderId::new(),
            owner,
            original_amount: Money::from_cents(2000),
            discount_amount: Money::from_cents(discount),
        }
    }

    #[tokio::test]
    async fn test_unknown_code() {
        let store = InMemoryRecordStore::new();
        let evaluator = CouponEvaluator::new(store, 16);
        let result = evaluator
            .validate("nope", Money::from_cents(1000), &anon())
            .await
            .unwrap();
        assert!(!result.applicable);
        assert_eq!(result.reason, Some(CouponRejection::NotFound));
        assert!(matches!(
            result.into_applicable(),
            Err(CheckoutError::CouponIneligible(CouponRejection::NotFound))
        ));
    }

    #[tokio::test]
    async fn test_percentage_capped_scenario() {
        let (from, to) = window();
        let coupon = Coupon::one_time("HALF", Discount::Percentage { basis_points: 5000 }, from, to)
            .with_max_discount(Money::from_cents(500));
        let (evaluator, _) = evaluator_with(coupon).await;

        let result = evaluator
            .validate("half", Money::from_cents(2000), &anon())
            .await
            .unwrap();
        assert!(result.applicable);
        assert_eq!(result.discount_amount, Money::from_cents(500));
    }

    #[tokio::test]
    async fn test_validate_never_writes() {
        let (from, to) = window();
        let coupon = Coupon::one_time("WELCOME", Discount::FixedAmount { amount: Money::from_cents(300) }, from, to);
        let (evaluator, _) = evaluator_with(coupon).await;

        for _ in 0..3 {
            evaluator
                .validate("WELCOME", Money::from_cents(1000), &anon())
                .await
                .unwrap();
        }
        let stored = evaluator.get_coupon("WELCOME").await.unwrap();
        assert_eq!(stored.usage_count(), 0);
        assert!(!stored.is_used());
    }

    #[tokio::test]
    async fn test_personal_coupon_owner_check() {
        let (from, to) = window();
        let user = UserId::new();
        let coupon = Coupon::one_time("MINE", Discount::FixedAmount { amount: Money::from_cents(300) }, from, to)
            .personal_to(user);
        let (evaluator, _) = evaluator_with(coupon).await;

        let other = evaluator
            .validate("MINE", Money::from_cents(1000), &Owner::User(UserId::new()))
            .await
            .unwrap();
        assert_eq!(other.reason, Some(CouponRejection::WrongOwner));

        let mine = evaluator
            .validate("MINE", Money::from_cents(1000), &Owner::User(user))
            .await
            .unwrap();
        assert!(mine.applicable);
    }

    #[tokio::test]
    async fn test_consume_one_time_then_reject() {
        let (from, to) = window();
        let coupon = Coupon::one_time("WELCOME", Discount::FixedAmount { amount: Money::from_cents(300) }, from, to);
        let (evaluator, _) = evaluator_with(coupon).await;
        let owner = anon();

        let usage = evaluator.consume(request(&owner, 300)).await.unwrap();
        assert_eq!(usage.final_amount, Money::from_cents(1700));
        assert_eq!(usage.coupon_code, "WELCOME");

        let second = evaluator.consume(request(&owner, 300)).await;
        assert!(matches!(
            second,
            Err(CheckoutError::CouponNoLongerValid(CouponRejection::AlreadyUsed))
        ));
        assert_eq!(evaluator.usage_history("welcome").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reverse_is_idempotent() {
        let (from, to) = window();
        let coupon = Coupon::gradual(
            "WELCOME",
            Money::from_cents(1000),
            Discount::FixedAmount { amount: Money::from_cents(400) },
            from,
            to,
        );
        let (evaluator, _) = evaluator_with(coupon).await;
        let owner = anon();

        let usage = evaluator.consume(request(&owner, 400)).await.unwrap();
        assert_eq!(usage.remaining_balance, Money::from_cents(600));

        assert!(evaluator.reverse("welcome", usage.id).await.unwrap());
        assert!(!evaluator.reverse("welcome", usage.id).await.unwrap());

        let coupon = evaluator.get_coupon("WELCOME").await.unwrap();
        assert_eq!(coupon.remaining_balance(), Money::from_cents(1000));
        assert_eq!(coupon.usage_count(), 0);
        assert!(evaluator.usage_history("WELCOME").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ledger_write_failure_reverts_counters() {
        let (from, to) = window();
        let coupon = Coupon::one_time("WELCOME", Discount::FixedAmount { amount: Money::from_cents(300) }, from, to);
        let (evaluator, store) = evaluator_with(coupon).await;
        store.fail_writes_for(CouponUsage::KIND).await;
        let owner = anon();

        let result = evaluator.consume(request(&owner, 300)).await;
        assert!(matches!(result, Err(CheckoutError::PersistenceFailure(_))));

        let coupon = evaluator.get_coupon("WELCOME").await.unwrap();
        assert!(!coupon.is_used());
        assert_eq!(coupon.usage_count(), 0);
    }

    #[tokio::test]
    async fn test_consume_writes_usage_id_into_coupon() {
        let (from, to) = window();
        let coupon = Coupon::one_time("WELCOME", Discount::FixedAmount { amount: Money::from_cents(300) }, from, to);
        let (evaluator, _) = evaluator_with(coupon).await;
        let owner = anon();
        let request = request(&owner, 300);
        let usage_id = request.usage_id;

        let usage = evaluator.consume(request).await.unwrap();
        assert_eq!(usage.id, usage_id);
        assert!(evaluator.get_coupon("WELCOME").await.unwrap().is_redeemed(usage_id));
    }

    #[tokio::test]
    async fn test_reverse_without_ledger_row_restores_counters() {
        let (from, to) = window();
        let coupon = Coupon::one_time("WELCOME", Discount::FixedAmount { amount: Money::from_cents(300) }, from, to);
        let (evaluator, _) = evaluator_with(coupon).await;
        let owner = anon();

        let usage = evaluator.consume(request(&owner, 300)).await.unwrap();
        assert!(evaluator.remove_usage(usage.id).await.unwrap());

        assert!(evaluator.reverse("WELCOME", usage.id).await.unwrap());
        let coupon = evaluator.get_coupon("WELCOME").await.unwrap();
        assert!(!coupon.is_used());
        assert_eq!(coupon.usage_count(), 0);
    }

    #[tokio::test]
    async fn test_reverse_of_unknown_usage_leaves_coupon_spent() {
        let (from, to) = window();
        let coupon = Coupon::one_time("WELCOME", Discount::FixedAmount { amount: Money::from_cents(300) }, from, to);
        let (evaluator, _) = evaluator_with(coupon).await;
        let owner = anon();
        evaluator.consume(request(&owner, 300)).await.unwrap();

        assert!(!evaluator.reverse("WELCOME", UsageId::new()).await.unwrap());
        let coupon = evaluator.get_coupon("WELCOME").await.unwrap();
        assert!(coupon.is_used());
        assert_eq!(coupon.usage_count(), 1);
        assert_eq!(evaluator.usage_history("WELCOME").await.unwrap().len(), 1);
    }
}
