//! Interface of the deployed lottery contract.
//!
//! The contract itself lives outside this repository. Bindings for its
//! calls and events are generated from the Solidity declaration below.

use alloy_primitives::{
    B256,
    LogData,
};
use alloy_sol_types::{
    SolEvent,
    SolEventInterface,
    sol,
};

pub use ILottery::ILotteryEvents as LotteryLog;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface ILottery {
        event LotteryEnter(address indexed player, uint256 indexed lotteryId, uint256 timestamp);
        event GuaranteedWinner(address indexed winner, uint256 indexed lotteryId, uint256 prizeAmount);
        event JackpotWinner(address indexed winner, uint256 indexed lotteryId, uint256 jackpotAmount);
        event JackpotMiss(uint256 indexed lotteryId, uint256 carryOver);
        event DonationMade(address indexed charity, uint256 indexed lotteryId, uint256 amount);
        event LotteryReset(uint256 indexed newLotteryId);

        function lotteryId() external view returns (uint256);
        function lotteryOpen() external view returns (bool);
        function getPlayersCount() external view returns (uint256);
        function getPlayers() external view returns (address[] memory);
        function getPrizePool() external view returns (uint256);
        function getTotalDonated() external view returns (uint256);
        function getFeeInfo() external view returns (
            uint256 winnerPercentage,
            uint256 donationPercentage,
            uint256 adminPercentage,
            address charity
        );
        function admin() external view returns (address);
        function TICKET_PRICE() external view returns (uint256);

        function getWinner(uint256 lotteryId) external view returns (address);
        function getGuaranteedPrize(uint256 lotteryId) external view returns (uint256);
        function getJackpotPrize(uint256 lotteryId) external view returns (uint256);
        function getDonationAmount(uint256 lotteryId) external view returns (uint256);
        function wasJackpotWon(uint256 lotteryId) external view returns (bool);

        function enter() external payable;
        function pickWinner() external;
        function pauseLottery() external;
        function resumeLottery() external;
    }
}

/// Topic-0 values of the six events the client listens to.
pub fn subscribed_topics() -> [B256; 6] {
    [
        ILottery::LotteryEnter::SIGNATURE_HASH,
        ILottery::GuaranteedWinner::SIGNATURE_HASH,
        ILottery::JackpotWinner::SIGNATURE_HASH,
        ILottery::JackpotMiss::SIGNATURE_HASH,
        ILottery::DonationMade::SIGNATURE_HASH,
        ILottery::LotteryReset::SIGNATURE_HASH,
    ]
}

/// Returns `Ok(None)` for logs that are not one of the subscribed events.
pub fn decode_log(
    log: &LogData,
) -> Result<Option<LotteryLog>, alloy_sol_types::Error> {
    match log.topics().first() {
        Some(topic) if subscribed_topics().contains(topic) => {
            LotteryLog::decode_raw_log(log.topics(), &log.data).map(Some)
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use alloy_primitives::{
        Address,
        U256,
        address,
        b256,
    };
    use alloy_sol_types::SolCall;

    fn word(value: u64) -> [u8; 32] {
        U256::from(value).to_be_bytes::<32>()
    }

    #[test]
    fn selectors__match_deployed_contract() {
        assert_eq!(ILottery::enterCall::SELECTOR, [0xe9, 0x7d, 0xcb, 0x62]);
        assert_eq!(ILottery::pickWinnerCall::SELECTOR, [0x5d, 0x49, 0x5a, 0xea]);
        assert_eq!(ILottery::getPlayersCall::SIGNATURE, "getPlayers()");
        assert_eq!(ILottery::getWinnerCall::SIGNATURE, "getWinner(uint256)");
    }

    #[test]
    fn get_winner__encodes_round_id_as_big_endian_word() {
        // when
        let data = ILottery::getWinnerCall {
            lotteryId: U256::from(14),
        }
        .abi_encode();

        // then
        assert_eq!(data.len(), 36);
        assert_eq!(data[..4], ILottery::getWinnerCall::SELECTOR);
        assert_eq!(data[4..], word(14));
    }

    #[test]
    fn get_players__reads_offset_length_and_items() {
        // given
        let alice = Address::repeat_byte(0xaa);
        let bob = Address::repeat_byte(0xbb);
        let mut data = Vec::new();
        data.extend_from_slice(&word(32));
        data.extend_from_slice(&word(2));
        data.extend_from_slice(alice.into_word().as_slice());
        data.extend_from_slice(bob.into_word().as_slice());

        // when
        let players = ILottery::getPlayersCall::abi_decode_returns(&data).unwrap();

        // then
        assert_eq!(players, vec![alice, bob]);
    }

    #[test]
    fn get_players__length_beyond_return_data__is_an_error() {
        // given
        let mut truncated = Vec::new();
        truncated.extend_from_slice(&word(32));
        truncated.extend_from_slice(&word(2));
        truncated.extend_from_slice(Address::repeat_byte(1).into_word().as_slice());
        let mut oversized = Vec::new();
        oversized.extend_from_slice(&word(32));
        oversized.extend_from_slice(&word(u64::MAX));

        // when
        let truncated = ILottery::getPlayersCall::abi_decode_returns(&truncated);
        let oversized = ILottery::getPlayersCall::abi_decode_returns(&oversized);

        // then
        assert!(truncated.is_err());
        assert!(oversized.is_err());
    }

    #[test]
    fn get_fee_info__reads_named_outputs() {
        // given
        let charity = address!("0x4242424242424242424242424242424242424242");
        let mut data = Vec::new();
        data.extend_from_slice(&word(80));
        data.extend_from_slice(&word(15));
        data.extend_from_slice(&word(5));
        data.extend_from_slice(charity.into_word().as_slice());

        // when
        let fees = ILottery::getFeeInfoCall::abi_decode_returns(&data).unwrap();

        // then
        assert_eq!(fees.winnerPercentage, U256::from(80));
        assert_eq!(fees.donationPercentage, U256::from(15));
        assert_eq!(fees.adminPercentage, U256::from(5));
        assert_eq!(fees.charity, charity);
    }

    #[test]
    fn decode_log__guaranteed_winner_reads_indexed_and_data_fields() {
        // given
        let event = ILottery::GuaranteedWinner {
            winner: Address::repeat_byte(0x11),
            lotteryId: U256::from(7),
            prizeAmount: U256::from(1_000),
        };
        let log = event.encode_log_data();

        // when
        let actual = decode_log(&log).unwrap();

        // then
        assert_eq!(actual, Some(LotteryLog::GuaranteedWinner(event)));
    }

    #[test]
    fn decode_log__unknown_topic_is_ignored() {
        // given
        let transfer =
            b256!("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");
        let log = LogData::new_unchecked(vec![transfer], Default::default());

        // when
        let actual = decode_log(&log).unwrap();

        // then
        assert_eq!(actual, None);
    }

    #[test]
    fn decode_log__missing_indexed_topic_is_an_error() {
        // given
        let log = LogData::new_unchecked(
            vec![ILottery::JackpotMiss::SIGNATURE_HASH],
            word(5).to_vec().into(),
        );

        // when
        let result = decode_log(&log);

        // then
        assert!(result.is_err());
    }

    #[test]
    fn subscribed_topics__are_distinct() {
        let topics = subscribed_topics();
        for (i, a) in topics.iter().enumerate() {
            for b in &topics[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
