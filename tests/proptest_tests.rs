//! Property-based tests for NIF checksums, ATCUD formatting, document
//! totals and the hash-chain primitives.
//!
//! Run with: `cargo test --features all --test proptest_tests`

#![cfg(feature = "core")]

use chrono::NaiveDate;
use fatura::core::*;
use fatura::series::*;
use proptest::prelude::*;
use rust_decimal::Decimal;

fn check_digit(prefix: &[u32]) -> u32 {
    let sum: u32 = prefix
        .iter()
        .enumerate()
        .map(|(i, d)| d * (9 - i as u32))
        .sum();
    match 11 - sum % 11 {
        10 | 11 => 0,
        c => c,
    }
}

fn arb_nif_prefix() -> impl Strategy<Value = Vec<u32>> {
    (
        prop::sample::select(vec![1u32, 2, 3, 5, 6, 9]),
        prop::collection::vec(0u32..10, 7),
    )
        .prop_map(|(first, rest)| {
            let mut digits = vec![first];
            digits.extend(rest);
            digits
        })
}

fn digits_to_string(digits: &[u32]) -> String {
    digits
        .iter()
        .map(|d| char::from_digit(*d, 10).unwrap())
        .collect()
}

fn arb_amount() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

fn arb_quantity() -> impl Strategy<Value = Decimal> {
    (1i64..100).prop_map(Decimal::from)
}

fn arb_line() -> impl Strategy<Value = DocumentLine> {
    (arb_quantity(), arb_amount(), prop::sample::select(vec![6u32, 13, 23])).prop_map(
        |(qty, price, rate)| {
            let rate = Decimal::from(rate);
            let tax = (qty * price * rate / Decimal::ONE_HUNDRED).round_dp(2);
            LineBuilder::new("P001", "Artigo", qty, price)
                .tax_rate(rate, tax)
                .build()
        },
    )
}

proptest! {
    #[test]
    fn computed_check_digit_is_accepted(prefix in arb_nif_prefix()) {
        let mut digits = prefix.clone();
        digits.push(check_digit(&prefix));
        let nif = digits_to_string(&digits);
        prop_assert!(validate_nif(&nif).is_ok(), "{} rejected", nif);
    }

    #[test]
    fn any_other_check_digit_is_rejected(prefix in arb_nif_prefix(), offset in 1u32..10) {
        let mut digits = prefix.clone();
        digits.push((check_digit(&prefix) + offset) % 10);
        let nif = digits_to_string(&digits);
        prop_assert_eq!(
            validate_nif(&nif).map_err(|e| e.rejection),
            Err(NifRejection::CheckDigit)
        );
    }

    #[test]
    fn arbitrary_input_never_panics(input in "\\PC{0,12}") {
        if validate_nif(&input).is_ok() {
            prop_assert_eq!(input.len(), 9);
            prop_assert!(input.bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn atcud_is_code_dash_unpadded_sequence(
        code in "[A-Z0-9]{8,12}",
        seq in 1u64..10_000_000,
    ) {
        let mut series = FiscalSeries::new(SeriesKey::new("Exemplo Lda", DocumentType::Invoice, 2024, "A2024"));
        series.set_validation_code(code.clone()).unwrap();
        let atcud = series.compute_atcud(seq).unwrap();
        prop_assert_eq!(&atcud, &format!("{code}-{seq}"));
        let (_, number) = atcud.rsplit_once('-').unwrap();
        prop_assert!(!number.starts_with('0'));
    }

    #[test]
    fn gross_is_net_plus_tax_plus_stamp_duty(
        lines in prop::collection::vec(arb_line(), 1..=6),
        stamp in (0i64..1000).prop_map(|c| Decimal::new(c, 2)),
    ) {
        let doc = DocumentBuilder::new(
            "SINV-P",
            SeriesKey::new("Exemplo Lda", DocumentType::Invoice, 2024, "A2024"),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        )
        .issuer_nif("501442600")
        .customer(Customer::final_consumer())
        .stamp_duty(stamp);
        let doc = lines
            .into_iter()
            .fold(doc, |b, l| b.add_line(l))
            .build()
            .unwrap();

        let net: Decimal = doc.lines.iter().map(|l| l.net_amount).sum();
        let tax: Decimal = doc.lines.iter().map(|l| l.tax.amount).sum();
        prop_assert_eq!(doc.totals.net_total, net);
        prop_assert_eq!(doc.totals.tax_payable, tax);
        prop_assert_eq!(doc.totals.gross_total, net + tax + stamp);
    }
}

#[cfg(feature = "signing")]
mod chain {
    use chrono::NaiveTime;
    use fatura::signing::*;

    use super::*;

    fn arb_payload() -> impl Strategy<Value = String> {
        (
            1u32..=28,
            0u32..24,
            1u64..100_000,
            arb_amount(),
            "[0-9A-F]{40}|0",
        )
            .prop_map(|(day, hour, seq, total, prev)| {
                signature_payload(
                    NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
                    NaiveTime::from_hms_opt(hour, 15, 0).unwrap(),
                    &format!("FT A2024/{seq:05}"),
                    total,
                    &prev,
                )
            })
    }

    proptest! {
        #[test]
        fn hash_is_uppercase_sha1_hex(payload in arb_payload()) {
            let hash = document_hash(&payload);
            prop_assert_eq!(hash.len(), 40);
            prop_assert!(hash.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
        }

        #[test]
        fn fragment_is_four_base64_chars(payload in arb_payload()) {
            let fragment = hash_fragment(&payload);
            prop_assert_eq!(fragment.chars().count(), 4);
            prop_assert!(fragment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == FRAGMENT_FILLER));
        }

        #[test]
        fn payload_total_has_two_decimals(total in arb_amount(), extra in 0i64..10) {
            // Extra precision beyond cents is rounded away.
            let precise = total + Decimal::new(extra, 4);
            let payload = signature_payload(
                NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                NaiveTime::MIN,
                "FT A2024/00001",
                precise,
                SEED_HASH,
            );
            let amount = payload.split(';').nth(3).unwrap();
            let (_, cents) = amount.split_once('.').unwrap();
            prop_assert_eq!(cents.len(), 2);
        }

        #[test]
        fn different_predecessor_changes_hash(payload in arb_payload()) {
            let (head, prev) = payload.rsplit_once(';').unwrap();
            let other = if prev == SEED_HASH { "A".repeat(40) } else { SEED_HASH.to_string() };
            let relinked = format!("{head};{other}");
            prop_assert_ne!(document_hash(&payload), document_hash(&relinked));
        }
    }
}
