/*!
 * Tests for translation validation and protected terms
 */

use lingodeck::database::models::{ProtectedTerm, TermCategory};
use lingodeck::protection::{applicable_terms, apply_protection, restore_protection};
use lingodeck::translation::{Validation, Validator};

fn default_validator() -> Validator {
    Validator::new(&[r"\{[^}]+\}", r"\$\{[^}]+\}", r"%[sd]", r"\{\{[^}]+\}\}"])
}

fn term(text: &str, category: TermCategory, is_regex: bool, scopes: &[&str]) -> ProtectedTerm {
    ProtectedTerm {
        id: 0,
        project_id: 1,
        term: text.to_string(),
        category,
        is_regex,
        key_scopes: scopes.iter().map(|s| s.to_string()).collect(),
    }
}

/// Test the accepted translation of the greeting key
#[test]
fn test_validate_withPlaceholderKept_shouldAccept() {
    let validator = default_validator();
    let terms = vec![term("Acme", TermCategory::Brand, false, &[])];
    let applicable = applicable_terms(&terms, "a.b");

    assert_eq!(validator.validate("Hello {name}", "Bonjour {name}", &applicable), Validation::Valid);
}

/// Test that a dropped placeholder is rejected with a reason naming it
#[test]
fn test_validate_withPlaceholderDropped_shouldNameIt() {
    let validator = default_validator();
    let result = validator.validate("Hello {name}", "Bonjour", &[]);

    assert!(!result.is_valid());
    assert!(result.reason().unwrap().contains("{name}"));
}

/// Test every placeholder flavour of the default patterns
#[test]
fn test_validate_withMixedPlaceholders_shouldCheckEachFlavour() {
    let validator = default_validator();
    let source = "Hi {{user}}, you owe ${amount} for %s item(s)";

    assert!(validator
        .validate(source, "Salut {{user}}, vous devez ${amount} pour %s article(s)", &[])
        .is_valid());
    assert!(validator
        .validate(source, "Salut {{user}}, vous devez pour %s article(s)", &[])
        .reason()
        .unwrap()
        .contains("${amount}"));
    assert!(validator
        .validate(source, "Salut {user}, vous devez ${amount} pour %s article(s)", &[])
        .reason()
        .unwrap()
        .contains("{{user}}"));
}

/// Test that a validator without patterns ignores placeholders
#[test]
fn test_validate_withoutPatterns_shouldSkipPlaceholderCheck() {
    let validator = Validator::new::<&str>(&[]);
    assert!(validator.validate("Hello {name}", "Bonjour", &[]).is_valid());
    assert!(!validator.validate("Hello {name}", "   ", &[]).is_valid());
}

/// Test that scoped terms only bind their keys
#[test]
fn test_validate_withScopedTerm_shouldOnlyApplyToScopedKey() {
    let validator = default_validator();
    let terms = vec![term("Pro", TermCategory::Brand, false, &["pricing.plan"])];

    let scoped = applicable_terms(&terms, "pricing.plan");
    let other = applicable_terms(&terms, "home.title");
    assert_eq!(scoped.len(), 1);
    assert!(other.is_empty());

    assert!(!validator.validate("Upgrade to Pro", "Passez à la version Premium", &scoped).is_valid());
    assert!(validator.validate("Upgrade to Pro", "Passez à la version Premium", &other).is_valid());
}

/// Test that protected terms survive the placeholder round trip
#[test]
fn test_protection_withLiteralAndRegexTerms_shouldRestoreOriginals() {
    let terms = vec![
        term("Acme Cloud", TermCategory::Brand, false, &[]),
        term("Acme", TermCategory::Brand, false, &[]),
        term(r"https://\S+", TermCategory::Url, true, &[]),
    ];
    let applicable = applicable_terms(&terms, "footer.text");
    let source = "Acme Cloud by Acme, see https://acme.example/docs";

    let protected = apply_protection(source, &applicable);
    assert!(!protected.text.contains("Acme"));
    assert!(!protected.text.contains("https://"));
    assert_eq!(protected.replacements.len(), 3);

    // The provider translates around the placeholders
    let translated = protected
        .text
        .replace("by", "par")
        .replace("see", "voir");
    let restored = restore_protection(&translated, &protected.replacements);
    assert_eq!(restored, "Acme Cloud par Acme, voir https://acme.example/docs");

    let validator = default_validator();
    assert!(validator.validate(source, &restored, &applicable).is_valid());
}

/// Test that a term absent from the source is not required
#[test]
fn test_validate_withTermMissingFromSource_shouldNotRequireIt() {
    let validator = default_validator();
    let terms = vec![term("Acme", TermCategory::Brand, false, &[])];
    let applicable = applicable_terms(&terms, "home.cta");

    assert!(validator.validate("Buy now", "Acheter", &applicable).is_valid());
    assert_eq!(
        validator.validate("Buy Acme now", "Acheter maintenant", &applicable).reason(),
        Some("protected term 'Acme' not preserved")
    );
}
