//! Property tests for claim chain folding.

use lockbox_core::PathExp;
use lockbox_keyring::{fold, IdentityKeys, KeyringEngine};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Add(usize),
    Revoke(usize),
    Rotate,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..4).prop_map(Op::Add),
        (0usize..4).prop_map(Op::Revoke),
        Just(Op::Rotate),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn fold_is_deterministic(ops in proptest::collection::vec(op(), 0..12)) {
        let scope = PathExp::parse("/org1/proj1/*").unwrap();
        let founder = IdentityKeys::generate();
        let pool: Vec<IdentityKeys> = (0..4).map(|_| IdentityKeys::generate()).collect();

        let engine = KeyringEngine::new();
        engine.create_keyring(scope.clone(), &founder).unwrap();

        // Invalid operations are rejected without touching the chain.
        for op in ops {
            let before = engine.membership(&scope).unwrap();
            let result = match op {
                Op::Add(i) => engine.add_member(&scope, &founder, &pool[i].public()),
                Op::Revoke(i) => engine.revoke_member(&scope, &founder, &pool[i].id()),
                Op::Rotate => engine.rotate(&scope, &founder),
            };
            if result.is_err() {
                prop_assert_eq!(engine.membership(&scope).unwrap(), before);
            }
        }

        let claims = engine.snapshot(&scope).unwrap().claims;
        let first = fold(&scope, &claims).unwrap();
        let second = fold(&scope, &claims).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first, engine.membership(&scope).unwrap());

        for (i, member) in pool.iter().enumerate() {
            let active = engine.membership(&scope).unwrap().is_member(&member.id());
            prop_assert_eq!(
                engine.resolve(&scope, member).is_ok(),
                active,
                "member {} resolve disagrees with membership",
                i
            );
        }
    }
}
