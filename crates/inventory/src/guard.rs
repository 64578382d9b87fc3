//! Quantity invariant guard.
//!
//! Pure arithmetic for the check that runs inside every ledger write: given the
//! locked, current quantity-on-hand of a product, compute the quantity after a
//! movement is applied (or reversed), or refuse if the result would be negative.
//!
//! Callers must hold the product's row lock (or equivalent) for the whole
//! read-check-write; these functions only decide.

use stockledger_core::{DomainError, DomainResult, ProductId};

use crate::movement::{MovementKind, Quantity, StockMovement};

/// Quantity-on-hand after recording a movement of `kind`/`quantity`.
pub fn apply(
    product_id: ProductId,
    on_hand: i64,
    kind: MovementKind,
    quantity: Quantity,
) -> DomainResult<i64> {
    let next = on_hand
        .checked_add(kind.signed(quantity))
        .ok_or_else(|| DomainError::validation("quantity-on-hand would overflow"))?;

    if next < 0 {
        return Err(DomainError::insufficient_stock(
            product_id,
            on_hand,
            quantity.get(),
        ));
    }
    Ok(next)
}

/// Quantity-on-hand after deleting a movement of `kind`/`quantity`.
///
/// Deleting a receipt whose stock has already been issued is refused the same
/// way an over-issue is.
pub fn reverse(
    product_id: ProductId,
    on_hand: i64,
    kind: MovementKind,
    quantity: Quantity,
) -> DomainResult<i64> {
    apply(product_id, on_hand, kind.inverse(), quantity)
}

/// Receipts minus issues.
pub fn signed_sum<'a, I>(movements: I) -> i64
where
    I: IntoIterator<Item = &'a StockMovement>,
{
    movements.into_iter().map(StockMovement::signed_quantity).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(n: i64) -> Quantity {
        Quantity::new(n).unwrap()
    }

    #[test]
    fn receipt_adds() {
        let p = ProductId::new();
        assert_eq!(apply(p, 10, MovementKind::Receipt, q(5)).unwrap(), 15);
    }

    #[test]
    fn issue_subtracts_down_to_zero() {
        let p = ProductId::new();
        assert_eq!(apply(p, 15, MovementKind::Issue, q(15)).unwrap(), 0);
    }

    #[test]
    fn over_issue_is_refused_with_context() {
        let p = ProductId::new();
        let err = apply(p, 15, MovementKind::Issue, q(20)).unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock(p, 15, 20));
    }

    #[test]
    fn reversing_issue_adds_back() {
        let p = ProductId::new();
        assert_eq!(reverse(p, 0, MovementKind::Issue, q(15)).unwrap(), 15);
    }

    #[test]
    fn reversing_consumed_receipt_is_refused() {
        let p = ProductId::new();
        let err = reverse(p, 3, MovementKind::Receipt, q(5)).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock { on_hand: 3, requested: 5, .. }));
    }

    #[test]
    fn overflow_is_a_validation_error() {
        let p = ProductId::new();
        let err = apply(p, i64::MAX, MovementKind::Receipt, q(1)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use chrono::Utc;
        use proptest::prelude::*;
        use stockledger_core::{MovementId, UserId};

        use crate::movement::NewMovement;

        #[derive(Debug, Clone)]
        enum Op {
            Receipt(i64),
            Issue(i64),
            Delete(usize),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (1i64..50).prop_map(Op::Receipt),
                (1i64..50).prop_map(Op::Issue),
                any::<usize>().prop_map(Op::Delete),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: whatever the guard accepts keeps stock equal to the signed
            /// movement sum and never negative; whatever it refuses changes nothing.
            #[test]
            fn guard_preserves_derived_sum(ops in prop::collection::vec(op(), 1..60)) {
                let product_id = ProductId::new();
                let actor_id = UserId::new();
                let mut on_hand = 0i64;
                let mut movements: Vec<StockMovement> = Vec::new();

                for op in ops {
                    match op {
                        Op::Receipt(n) | Op::Issue(n) => {
                            let intent = match op {
                                Op::Receipt(_) => NewMovement::receipt(product_id, actor_id, n),
                                _ => NewMovement::issue(product_id, actor_id, n),
                            }.unwrap();
                            match apply(product_id, on_hand, intent.kind, intent.quantity) {
                                Ok(next) => {
                                    on_hand = next;
                                    movements.push(intent.into_movement(MovementId::new(), Utc::now()));
                                }
                                Err(e) => {
                                    let is_insufficient = matches!(e, DomainError::InsufficientStock { .. });
                                    prop_assert!(is_insufficient);
                                }
                            }
                        }
                        Op::Delete(idx) => {
                            if movements.is_empty() {
                                continue;
                            }
                            let idx = idx % movements.len();
                            let m = &movements[idx];
                            if let Ok(next) = reverse(product_id, on_hand, m.kind, m.quantity) {
                                on_hand = next;
                                movements.remove(idx);
                            }
                        }
                    }

                    prop_assert!(on_hand >= 0);
                    prop_assert_eq!(on_hand, signed_sum(&movements));
                }
            }
        }
    }
}
