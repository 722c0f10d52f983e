use super::*;
use pretty_assertions::assert_eq;

#[test]
fn intern_returns_same_name_for_same_text() {
    let interner = StringInterner::new();

    let x = interner.intern("x");
    let y = interner.intern("y");

    assert_eq!(x, interner.intern("x"));
    assert_ne!(x, y);
    assert_eq!(interner.lookup(x), "x");
    assert_eq!(interner.lookup(y), "y");
}

#[test]
fn empty_string_is_pre_interned() {
    let interner = StringInterner::new();
    assert_eq!(interner.intern(""), Name::EMPTY);
    assert_eq!(interner.lookup(Name::EMPTY), "");
    assert!(interner.is_empty());
}

#[test]
fn len_counts_distinct_strings() {
    let interner = StringInterner::new();
    interner.intern("a");
    interner.intern("b");
    interner.intern("a");
    assert_eq!(interner.len(), 3);
}

#[test]
fn shared_interner_clones_share_storage() {
    let interner = SharedInterner::new();
    let other = interner.clone();

    let a = interner.intern("counter");
    let b = other.intern("counter");

    assert_eq!(a, b);
    assert_eq!(StringLookup::lookup(&other, a), "counter");
}

#[test]
fn concurrent_interning_agrees() {
    let interner = SharedInterner::new();
    let names: Vec<Vec<Name>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let interner = interner.clone();
                s.spawn(move || {
                    (0..64)
                        .map(|i| interner.intern(&format!("var{i}")))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_default())
            .collect()
    });

    for other in &names[1..] {
        assert_eq!(&names[0], other);
    }
}

#[test]
#[should_panic(expected = "was not interned by this interner")]
fn lookup_of_foreign_name_panics() {
    let interner = StringInterner::new();
    let _ = interner.lookup(Name::new(3, 500));
}
