//! Built-in research hints for well-known companies.
//!
//! Regulator, IR site, and fiscal-year-end notes that steer the answer model
//! away from the usual dead ends. Keys are lowercase names; a company
//! matches when its name equals a key or starts with the key followed by a
//! space.

const HINTS: &[(&str, &str)] = &[
    ("abbott laboratories", "US company. Prefer SEC filings (10-K) and the IR site abbottinvestor.com."),
    ("accenture", "Incorporated in Ireland, files with the SEC (10-K). Fiscal year ends in August."),
    ("alphabet", "Parent of Google. Prefer SEC filings (10-K) and abc.xyz/investor. Calendar fiscal year."),
    ("amazon", "US company. Prefer SEC filings (10-K) and ir.aboutamazon.com. Calendar fiscal year."),
    ("apple", "US company. Prefer SEC filings (10-K) and investor.apple.com. Fiscal year ends in late September."),
    ("basf", "German company (SE). Look under Investor Relations on basf.com; ESEF reports are available."),
    ("caterpillar", "US company. Prefer SEC filings (10-K) and investors.caterpillar.com."),
    ("coca-cola", "US company. Prefer SEC filings (10-K) and investors.coca-colacompany.com."),
    ("dell technologies", "US company. Prefer SEC filings (10-K) and investors.delltechnologies.com. Fiscal year ends in late January or early February."),
    ("engie", "French company (SA). Look for 'Finance' or 'Investors'; ESEF universal registration documents are published."),
    ("exxon mobil", "US company. Prefer SEC filings (10-K) and corporate.exxonmobil.com/investors."),
    ("general electric", "US company. Prefer SEC filings (10-K) and ge.com/investor-relations."),
    ("hp inc", "US company. Prefer SEC filings (10-K) and investor.hp.com. Fiscal year ends in October."),
    ("ikea", "Privately held via Ingka Holding B.V.; only annual summaries are public. Look for 'Reports' on ingka.com."),
    ("international business machines", "IBM. Prefer SEC filings (10-K) and ibm.com/investor."),
    ("johnson & johnson", "US company. Prefer SEC filings (10-K) and investor.jnj.com."),
    ("meta platforms", "Formerly Facebook. Prefer SEC filings (10-K) and investor.atmeta.com."),
    ("microsoft", "US company. Prefer SEC filings (10-K) and microsoft.com/en-us/investor. Fiscal year ends in June."),
    ("oracle", "US company. Prefer SEC filings (10-K) and investor.oracle.com. Fiscal year ends in May."),
    ("pepsico", "US company. Prefer SEC filings (10-K) and pepsico.com/investors."),
    ("pfizer", "US company. Prefer SEC filings (10-K) and investors.pfizer.com."),
    ("procter & gamble", "US company. Prefer SEC filings (10-K) and pginvestor.com. Fiscal year ends in June."),
    ("sanofi", "French company (SA). Look for 'Investors'; files a 20-F with the SEC as well as an ESEF report."),
    ("siemens", "German company (AG). Look under Investor Relations on siemens.com. Fiscal year ends in September."),
    ("thyssenkrupp", "German company (AG). Look for 'Investoren' or 'Investors'. Fiscal year ends in September."),
    ("toyota motor", "Japanese company. Look under global.toyota/en/ir/. Fiscal year ends in March."),
    ("walt disney", "US company. Prefer SEC filings (10-K) and thewaltdisneycompany.com/investor-relations. Fiscal year ends in late September."),
    ("wpp", "UK company (PLC). Look for 'Investors' on wpp.com."),
];

/// Research hint for `company_name`, if one is known.
pub fn company_hint(company_name: &str) -> Option<&'static str> {
    let name = company_name.trim().to_lowercase();
    let name = name.strip_prefix("the ").unwrap_or(&name);

    HINTS
        .iter()
        .find(|(key, _)| {
            name == *key
                || name
                    .strip_prefix(key)
                    .is_some_and(|rest| rest.starts_with(' ') || rest.starts_with(','))
        })
        .map(|(_, hint)| *hint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_suffixed_names_match() {
        assert!(company_hint("Microsoft").unwrap().contains("June"));
        assert!(company_hint("Microsoft Corporation").is_some());
        assert!(company_hint("Oracle Corp.").unwrap().contains("May"));
        assert!(company_hint("The Walt Disney Company").is_some());
    }

    #[test]
    fn prefixes_must_end_at_a_word() {
        assert!(company_hint("Amazonas Energia").is_none());
        assert!(company_hint("Acme Corp").is_none());
    }
}
