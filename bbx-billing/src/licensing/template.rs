//! License document template
//!
//! One template renders both documents: the text file is the lines joined,
//! the PDF lays out the same lines.

use crate::pricing::{Rights, Tier};
use chrono::{DateTime, Utc};

/// Everything printed on a license
#[derive(Debug, Clone)]
pub struct LicenseTerms<'a> {
    pub license_id: &'a str,
    pub song_title: &'a str,
    pub tier: Tier,
    pub licensee: &'a str,
    pub issued_at: DateTime<Utc>,
}

fn granted_rights(rights: Rights) -> &'static [&'static str] {
    match rights {
        Rights::Personal => &[
            "- Personal, non-commercial listening and sharing",
            "- Use in non-monetized social media and personal projects",
            "- Credit to the original creator is appreciated",
        ],
        Rights::Commercial => &[
            "- Commercial use in monetized content, ads and releases",
            "- Distribution on streaming platforms and physical media",
            "- Synchronization with video, games and broadcast",
            "- Credit to the original creator is appreciated",
        ],
    }
}

fn restrictions(rights: Rights) -> &'static [&'static str] {
    match rights {
        Rights::Personal => &[
            "- No commercial use or monetization",
            "- No resale, sublicensing or redistribution of the audio file",
        ],
        Rights::Commercial => &[
            "- No resale or sublicensing of the audio file as a standalone product",
            "- No claim of authorship over the underlying composition",
        ],
    }
}

/// Render license lines
pub fn render_lines(terms: &LicenseTerms<'_>) -> Vec<String> {
    let rights = terms.tier.rights();
    let mut lines = vec![
        "BBX MUSIC LICENSE AGREEMENT".to_string(),
        String::new(),
        format!("License ID: {}", terms.license_id),
        format!("Song Title: {}", terms.song_title),
        format!(
            "License Tier: {} (${}.{:02})",
            terms.tier.display_name(),
            terms.tier.price_cents() / 100,
            terms.tier.price_cents() % 100
        ),
        format!("Licensee: {}", terms.licensee),
        format!("Issued: {}", terms.issued_at.format("%Y-%m-%d %H:%M:%S UTC")),
        String::new(),
        match rights {
            Rights::Personal => "RIGHTS GRANTED (PERSONAL USE)".to_string(),
            Rights::Commercial => "RIGHTS GRANTED (COMMERCIAL USE)".to_string(),
        },
    ];
    lines.extend(granted_rights(rights).iter().map(|s| s.to_string()));

    if terms.tier == Tier::Premium {
        lines.push("- Includes high-quality stems for personal remixing".to_string());
    }

    lines.push(String::new());
    lines.push("RESTRICTIONS".to_string());
    lines.extend(restrictions(rights).iter().map(|s| s.to_string()));
    lines.push(String::new());
    lines.push(format!(
        "Verify this license at /license/{}",
        terms.license_id
    ));

    lines
}

pub fn render_text(terms: &LicenseTerms<'_>) -> String {
    let mut text = render_lines(terms).join("\n");
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn terms(tier: Tier) -> LicenseTerms<'static> {
        LicenseTerms {
            license_id: "BBX-AB12-1700000000",
            song_title: "My Song",
            tier,
            licensee: "fan@example.com",
            issued_at: Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap(),
        }
    }

    #[test]
    fn test_personal_rights() {
        let text = render_text(&terms(Tier::Base));
        assert!(text.contains("License ID: BBX-AB12-1700000000"));
        assert!(text.contains("PERSONAL USE"));
        assert!(text.contains("No commercial use"));
        assert!(!text.contains("COMMERCIAL USE"));
        assert!(text.contains("$2.99"));
    }

    #[test]
    fn test_premium_mentions_stems() {
        let text = render_text(&terms(Tier::Premium));
        assert!(text.contains("PERSONAL USE"));
        assert!(text.contains("stems"));
        assert!(text.contains("$9.99"));
    }

    #[test]
    fn test_commercial_rights() {
        let text = render_text(&terms(Tier::Commercial));
        assert!(text.contains("COMMERCIAL USE"));
        assert!(text.contains("streaming platforms"));
        assert!(text.contains("$29.99"));
    }
}
