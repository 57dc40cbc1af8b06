//! Customer feedback

use crate::core_types::{FeedbackId, UserId, narrow_id};
use crate::error::{BankError, BankResult};
use crate::models::{FEEDBACK_LEN, Feedback};
use crate::storage::Record;

use super::Bank;
use super::validation::require_text;

impl Bank {
    pub fn add_feedback(&self, user_id: UserId, text: &str) -> BankResult<Feedback> {
        require_text("feedback", text, FEEDBACK_LEN)?;
        let (_, feedback) = self.feedback.append_with(|next| {
            Ok(Feedback {
                feedback_id: narrow_id(next, Feedback::TABLE)?,
                user_id,
                text: text.to_string(),
                is_reviewed: false,
            })
        })?;
        tracing::info!(feedback_id = feedback.feedback_id, user_id, "Feedback added");
        Ok(feedback)
    }

    pub fn feedback_for_user(&self, user_id: UserId) -> BankResult<Vec<Feedback>> {
        self.list_feedback(|f| f.user_id == user_id)
    }

    pub fn unreviewed_feedback(&self) -> BankResult<Vec<Feedback>> {
        self.list_feedback(|f| !f.is_reviewed)
    }

    fn list_feedback(&self, pred: impl FnMut(&Feedback) -> bool) -> BankResult<Vec<Feedback>> {
        Ok(self.feedback.scan(pred)?.into_iter().map(|(_, f)| f).collect())
    }

    pub fn review_feedback(&self, feedback_id: FeedbackId) -> BankResult<Feedback> {
        let (index, _) = self.feedback.require_by_id(feedback_id as i64, "feedback")?;
        self.feedback.update_at(index, |feedback| {
            if feedback.is_reviewed {
                return Err(BankError::Conflict(format!(
                    "feedback {} is already reviewed",
                    feedback_id
                )));
            }
            feedback.is_reviewed = true;
            Ok(feedback.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::tests_support::open_bank;

    #[test]
    fn test_feedback_lifecycle() {
        let (_dir, bank) = open_bank();
        let first = bank.add_feedback(4, "Great service").unwrap();
        bank.add_feedback(5, "Slow branch").unwrap();
        assert_eq!(first.feedback_id, 1);
        assert_eq!(bank.unreviewed_feedback().unwrap().len(), 2);

        bank.review_feedback(first.feedback_id).unwrap();
        assert_eq!(bank.unreviewed_feedback().unwrap().len(), 1);
        assert!(bank.feedback_for_user(4).unwrap()[0].is_reviewed);
        assert!(matches!(
            bank.review_feedback(first.feedback_id),
            Err(BankError::Conflict(_))
        ));
        assert!(matches!(bank.review_feedback(9), Err(BankError::NotFound(_))));
    }

    #[test]
    fn test_feedback_text_limits() {
        let (_dir, bank) = open_bank();
        assert!(bank.add_feedback(1, "").is_err());
        assert!(bank.add_feedback(1, &"x".repeat(FEEDBACK_LEN + 1)).is_err());
        assert!(bank.add_feedback(1, &"x".repeat(FEEDBACK_LEN)).is_ok());
    }
}
