//! Payment receipt detection for extracted image and document text.

use std::sync::LazyLock;

use regex::Regex;

pub const RECEIPT_KEYWORDS: &[&str] = &[
    "comprovante",
    "pagamento",
    "transferência",
    "pix",
    "valor",
    "data da transação",
    "beneficiário",
    "ted",
    "doc",
    "recibo",
    "autenticação",
    "instituição",
];

static CURRENCY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"R?\$?\s*\d+[,.]\d{2}").expect("valid regex"));

/// At least one keyword (case-insensitive substring) and something that
/// looks like an amount.
pub fn is_receipt(text: &str) -> bool {
    let lower = text.to_lowercase();
    RECEIPT_KEYWORDS.iter().any(|k| lower.contains(k)) && CURRENCY_RE.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pix_receipt_is_detected() {
        assert!(is_receipt("Comprovante de transferência PIX\nValor: R$ 150,00"));
        assert!(is_receipt("PAGAMENTO efetuado 89.90"));
    }

    #[test]
    fn needs_both_keyword_and_amount() {
        assert!(!is_receipt("Comprovante segue em anexo"));
        assert!(!is_receipt("Total R$ 12,50 no mercado"));
        assert!(!is_receipt(""));
    }
}
