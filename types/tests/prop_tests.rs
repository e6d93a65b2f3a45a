use orv_types::{Account, Amount, Block, BlockHash, Root, StateBlock};
use proptest::prelude::*;

fn state_block(account: u64, previous: u64, balance: u128, link: u64) -> Block {
    Block::State(StateBlock {
        account: Account::from(account),
        previous: BlockHash::from(previous),
        representative: Account::from(account),
        balance: Amount::raw(balance),
        link: BlockHash::from(link),
    })
}

proptest! {
    #[test]
    fn amount_survives_decimal_round_trip(raw in any::<u128>()) {
        let amount = Amount::raw(raw);
        let parsed: Amount = amount.to_string().parse().unwrap();
        prop_assert_eq!(parsed, amount);
    }

    #[test]
    fn siblings_share_a_qualified_root(
        account in any::<u64>(),
        previous in 1u64..,
        a in any::<u128>(),
        b in any::<u128>(),
    ) {
        prop_assume!(a != b);
        let first = state_block(account, previous, a, 0);
        let second = state_block(account, previous, b, 0);
        prop_assert_eq!(first.qualified_root(), second.qualified_root());
        prop_assert_ne!(first.hash(), second.hash());
    }

    #[test]
    fn open_blocks_are_rooted_at_their_account(account in 1u64.., link in any::<u64>()) {
        let open = state_block(account, 0, 1, link);
        prop_assert_eq!(open.root(), Root::from(Account::from(account)));
    }
}
