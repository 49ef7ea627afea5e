use super::*;

const TWO_PARTY_PROGRAM: &str = r#"
from nada_dsl import *
def nada_main():
    party1 = Party(name="Party1")
    party2 = Party(name="Party2")
    my_int1 = SecretInteger(Input(name="my_int1", party=party1))
    my_int2 = SecretInteger(Input(name="my_int2", party=party2))
    x = my_int1 * my_int2
    output = x.reveal() * Integer(3)
    return [Output(output, "my_output", party1)]
"#;

fn symbol(name: &str) -> PartySymbol {
    PartySymbol::from(name)
}

fn input(ty: &str, name: &str) -> InputDecl {
    InputDecl {
        ty: ty.to_string(),
        name: name.to_string(),
    }
}

#[test]
fn extracts_parties_inputs_and_output_in_declaration_order() {
    let parties = extract(TWO_PARTY_PROGRAM).expect("extract");

    let symbols: Vec<&str> = parties.keys().map(PartySymbol::as_str).collect();
    assert_eq!(symbols, vec!["party1", "party2"]);

    let party1 = &parties[&symbol("party1")];
    assert_eq!(party1.party_name, "Party1");
    assert_eq!(party1.inputs, vec![input("SecretInteger", "my_int1")]);
    assert_eq!(party1.output_name.as_deref(), Some("my_output"));

    let party2 = &parties[&symbol("party2")];
    assert_eq!(party2.party_name, "Party2");
    assert_eq!(party2.inputs, vec![input("SecretInteger", "my_int2")]);
    assert_eq!(party2.output_name, None);
}

#[test]
fn tolerates_irregular_whitespace_and_multiple_inputs() {
    let source = "p1   =Party(  name = 'Alice' )\n\
                  a = SecretInteger( Input( name = \"a\" ,\n party = p1 ) )\n\
                  b = PublicUnsignedInteger(Input(name=\"b\",party=p1))\n";
    let parties = extract(source).expect("extract");

    let alice = &parties[&symbol("p1")];
    assert_eq!(alice.party_name, "Alice");
    assert_eq!(
        alice.inputs,
        vec![
            input("SecretInteger", "a"),
            input("PublicUnsignedInteger", "b")
        ]
    );
    assert!(alice.output_name.is_none());
}

#[test]
fn ignores_declarations_inside_comments_and_strings() {
    let source = r#"
# ghost = Party(name="Ghost")
doc = """
other = Party(name="Other")
"""
real = Party(name="Real")
note = "x = SecretInteger(Input(name='fake', party=real))"
v = SecretInteger(Input(name="v", party=real))
"#;
    let parties = extract(source).expect("extract");

    assert_eq!(parties.len(), 1);
    assert_eq!(parties[&symbol("real")].inputs, vec![input("SecretInteger", "v")]);
}

#[test]
fn identifier_boundaries_are_respected() {
    let source = r#"
p = MyParty(name="NotAParty")
q = Party(name="Q")
z = SecretInteger(MyInput(name="z", party=q))
"#;
    let parties = extract(source).expect("extract");

    assert_eq!(parties.len(), 1);
    assert!(parties[&symbol("q")].inputs.is_empty());
}

#[test]
fn input_for_undeclared_party_is_reported_with_line() {
    let source = "p = Party(name=\"P\")\nx = SecretInteger(Input(name=\"x\", party=nobody))\n";
    let err = extract(source).expect_err("undeclared");
    assert_eq!(
        err,
        ExtractError::UndeclaredParty {
            symbol: "nobody".to_string(),
            line: 2
        }
    );
}

#[test]
fn output_for_undeclared_party_is_reported() {
    let source = "p = Party(name=\"P\")\nreturn [Output(p, \"out\", q)]\n";
    assert!(matches!(
        extract(source),
        Err(ExtractError::UndeclaredParty { ref symbol, line: 2 }) if symbol == "q"
    ));
}

#[test]
fn party_may_be_declared_after_its_inputs() {
    let source = "x = SecretInteger(Input(name=\"x\", party=late))\nlate = Party(name=\"Late\")\n";
    let parties = extract(source).expect("extract");
    assert_eq!(parties[&symbol("late")].inputs, vec![input("SecretInteger", "x")]);
}

#[test]
fn duplicate_party_and_broken_strings_are_errors() {
    let duplicate = "a = Party(name=\"A\")\na = Party(name=\"B\")\n";
    assert!(matches!(
        extract(duplicate),
        Err(ExtractError::DuplicateParty { line: 2, .. })
    ));

    let unterminated = "a = Party(name=\"A)\n";
    assert_eq!(
        extract(unterminated),
        Err(ExtractError::UnterminatedString { line: 1 })
    );
}

#[test]
fn output_accepts_compound_expressions() {
    let source = r#"
p = Party(name="P")
a = SecretInteger(Input(name="a", party=p))
return [Output((a + Integer(1)) * a, "sum", p)]
"#;
    let parties = extract(source).expect("extract");
    assert_eq!(parties[&symbol("p")].output_name.as_deref(), Some("sum"));
}

#[test]
fn empty_source_yields_no_parties() {
    assert!(extract("").expect("extract").is_empty());
}
